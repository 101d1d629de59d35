pub mod types;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub use types::{Conversation, ConversationSummary};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_HEADER: &str = "X-Exedev-Userid";
const REQUEST_HEADER: &str = "X-Shelley-Request";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4.5";

/// Identity used by the conversation cleanup pass.
pub const CLEANUP_IDENTITY: &str = "cleanup";
/// Identity used when opening diagnostic conversations.
pub const TROUBLESHOOT_IDENTITY: &str = "news-app-troubleshoot";

/// Per-job identity so the agent service can attribute usage.
pub fn job_identity(job_id: i64) -> String {
    format!("news-job-{}", job_id)
}

/// Narrow view of the external agent service. The runner only depends on
/// this trait, so tests can script conversation state.
#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn create(&self, identity: &str, prompt: &str) -> Result<String>;

    async fn get(&self, identity: &str, conversation_id: &str) -> Result<Conversation>;

    /// Cancels and removes a conversation. Only transport failures are
    /// reported; the response status is ignored.
    async fn delete(&self, identity: &str, conversation_id: &str) -> Result<()>;

    async fn archive(&self, identity: &str, conversation_id: &str) -> Result<()>;

    async fn list(&self, identity: &str) -> Result<Vec<ConversationSummary>>;

    /// Conversations spawned by `parent_id` (sub-agents).
    async fn list_children(&self, identity: &str, parent_id: &str) -> Result<Vec<String>> {
        Ok(self
            .list(identity)
            .await?
            .into_iter()
            .filter(|c| c.parent_conversation_id.as_deref() == Some(parent_id))
            .map(|c| c.conversation_id)
            .collect())
    }
}

/// HTTP client for the agent service.
pub struct AgentClient {
    base_url: String,
    client: reqwest::Client,
}

impl AgentClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn conversation_url(&self, conversation_id: &str) -> String {
        format!("{}/api/conversation/{}", self.base_url, conversation_id)
    }
}

#[async_trait]
impl ConversationService for AgentClient {
    async fn create(&self, identity: &str, prompt: &str) -> Result<String> {
        let res = self
            .client
            .post(format!("{}/api/conversations/new", self.base_url))
            .header(USER_HEADER, identity)
            .header(REQUEST_HEADER, "1")
            .json(&types::CreateRequest {
                message: prompt,
                model: DEFAULT_MODEL,
            })
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!(
                "API error {}: {}",
                status.as_u16(),
                res.text().await.unwrap_or_default()
            ));
        }

        let body: types::CreateResponse = res.json().await?;
        if body.conversation_id.is_empty() {
            bail!("empty conversation ID in response");
        }
        debug!(conversation_id = %body.conversation_id, "conversation created");
        Ok(body.conversation_id)
    }

    async fn get(&self, identity: &str, conversation_id: &str) -> Result<Conversation> {
        let res = self
            .client
            .get(self.conversation_url(conversation_id))
            .header(USER_HEADER, identity)
            .send()
            .await?;

        if res.status() != reqwest::StatusCode::OK {
            bail!("API error {}", res.status().as_u16());
        }
        Ok(res.json().await?)
    }

    async fn delete(&self, identity: &str, conversation_id: &str) -> Result<()> {
        self.client
            .delete(self.conversation_url(conversation_id))
            .header(USER_HEADER, identity)
            .send()
            .await?;
        Ok(())
    }

    async fn archive(&self, identity: &str, conversation_id: &str) -> Result<()> {
        self.client
            .post(format!("{}/archive", self.conversation_url(conversation_id)))
            .header(USER_HEADER, identity)
            .header(REQUEST_HEADER, "1")
            .send()
            .await?;
        Ok(())
    }

    async fn list(&self, identity: &str) -> Result<Vec<ConversationSummary>> {
        let res = self
            .client
            .get(format!("{}/api/conversations", self.base_url))
            .header(USER_HEADER, identity)
            .send()
            .await?;

        if !res.status().is_success() {
            bail!("API error {}", res.status().as_u16());
        }
        Ok(res.json().await?)
    }
}
