use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::core::config::RunnerConfig;
use crate::core::conversation::types::{ConversationMeta, Message};
use crate::core::conversation::{Conversation, ConversationService, ConversationSummary};
use crate::core::notify::Notifier;
use crate::core::runner::Runner;
use crate::core::schedule::Frequency;
use crate::core::store::{JobRecord, NewJob, Store};

#[derive(Default)]
struct FakeState {
    answer: String,
    /// Polls answered with `working: true` before completing.
    pending_polls: usize,
    never_complete: bool,
    /// Polls answered with an error before any other behaviour.
    poll_errors: usize,
    fail_create: bool,
    next_id: u32,
    /// Known conversations and whether each is complete regardless of script.
    conversations: HashMap<String, Option<bool>>,
    children: Vec<(String, String)>,
    prompts: Vec<String>,
    identities: Vec<String>,
    polls: usize,
    deleted: Vec<String>,
    archived: Vec<String>,
}

/// Scripted stand-in for the agent service.
#[derive(Default)]
pub struct FakeAgent {
    state: Mutex<FakeState>,
}

impl FakeAgent {
    pub fn answering(answer: &str) -> Self {
        let agent = Self::default();
        agent.with(|s| s.answer = answer.to_string());
        agent
    }

    pub fn never_completing() -> Self {
        let agent = Self::default();
        agent.with(|s| s.never_complete = true);
        agent
    }

    pub fn failing_create() -> Self {
        let agent = Self::default();
        agent.with(|s| s.fail_create = true);
        agent
    }

    fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn set_answer(&self, answer: &str) {
        self.with(|s| {
            s.answer = answer.to_string();
            s.never_complete = false;
        });
    }

    pub fn set_pending_polls(&self, n: usize) {
        self.with(|s| s.pending_polls = n);
    }

    pub fn set_poll_errors(&self, n: usize) {
        self.with(|s| s.poll_errors = n);
    }

    /// Registers a conversation created outside this fake, optionally pinned
    /// to a completion state.
    pub fn add_conversation(&self, id: &str, complete: Option<bool>) {
        self.with(|s| {
            s.conversations.insert(id.to_string(), complete);
        });
    }

    pub fn add_child(&self, parent: &str, child: &str) {
        self.with(|s| s.children.push((parent.to_string(), child.to_string())));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.with(|s| s.prompts.clone())
    }

    pub fn identities(&self) -> Vec<String> {
        self.with(|s| s.identities.clone())
    }

    pub fn polls(&self) -> usize {
        self.with(|s| s.polls)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.with(|s| s.deleted.clone())
    }

    pub fn archived(&self) -> Vec<String> {
        self.with(|s| s.archived.clone())
    }
}

fn conversation(id: &str, working: bool, answer: &str) -> Conversation {
    Conversation {
        conversation: ConversationMeta {
            conversation_id: id.to_string(),
            working: Some(working),
        },
        messages: vec![Message {
            kind: "agent".to_string(),
            end_of_turn: !working,
            llm_data: json!({ "Content": [{ "Type": 2, "Text": answer }] }),
        }],
    }
}

#[async_trait]
impl ConversationService for FakeAgent {
    async fn create(&self, identity: &str, prompt: &str) -> Result<String> {
        self.with(|s| {
            s.identities.push(identity.to_string());
            if s.fail_create {
                bail!("API error 503: agent unavailable");
            }
            s.next_id += 1;
            let id = format!("conv-{}", s.next_id);
            s.prompts.push(prompt.to_string());
            s.conversations.insert(id.clone(), None);
            Ok(id)
        })
    }

    async fn get(&self, identity: &str, conversation_id: &str) -> Result<Conversation> {
        self.with(|s| {
            s.identities.push(identity.to_string());
            s.polls += 1;
            let pinned = match s.conversations.get(conversation_id) {
                Some(pinned) => *pinned,
                None => return Err(anyhow!("API error 404")),
            };
            if s.poll_errors > 0 {
                s.poll_errors -= 1;
                bail!("API error 502");
            }
            let working = match pinned {
                Some(complete) => !complete,
                None if s.never_complete => true,
                None if s.pending_polls > 0 => {
                    s.pending_polls -= 1;
                    true
                }
                None => false,
            };
            Ok(conversation(conversation_id, working, &s.answer))
        })
    }

    async fn delete(&self, _identity: &str, conversation_id: &str) -> Result<()> {
        self.with(|s| s.deleted.push(conversation_id.to_string()));
        Ok(())
    }

    async fn archive(&self, _identity: &str, conversation_id: &str) -> Result<()> {
        self.with(|s| s.archived.push(conversation_id.to_string()));
        Ok(())
    }

    async fn list(&self, _identity: &str) -> Result<Vec<ConversationSummary>> {
        Ok(self.with(|s| {
            s.children
                .iter()
                .map(|(parent, child)| ConversationSummary {
                    conversation_id: child.clone(),
                    parent_conversation_id: Some(parent.clone()),
                    ..Default::default()
                })
                .collect()
        }))
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub store: Store,
    pub agent: Arc<FakeAgent>,
    pub config: RunnerConfig,
}

impl Fixture {
    pub fn new(agent: FakeAgent) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("db.sqlite3")).unwrap();
        let mut config = RunnerConfig::for_data_dir(dir.path());
        config.start_delay = Duration::ZERO;
        config.poll_interval = Duration::from_millis(5);
        config.job_timeout = Duration::from_secs(5);
        config.max_parallel = 2;
        Self {
            dir,
            store,
            agent: Arc::new(agent),
            config,
        }
    }

    pub fn runner(&self) -> Runner {
        let agent: Arc<dyn ConversationService> = self.agent.clone();
        Runner::new(self.config.clone(), self.store.clone(), agent)
            .unwrap()
            .with_notifier(Notifier::with_base_delay(Duration::from_millis(5)))
    }

    pub async fn job(&self, is_one_time: bool) -> JobRecord {
        self.store
            .create_job(&NewJob {
                user_id: 1,
                name: "Local news".to_string(),
                prompt: "Find local news".to_string(),
                keywords: "council".to_string(),
                frequency: Frequency::Daily,
                is_one_time,
                ..Default::default()
            })
            .await
            .unwrap()
    }
}

/// A one-item answer pointing at a closed local port, so fetches fail fast.
pub fn answer_for(urls: &[&str]) -> String {
    let items: Vec<_> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| json!({ "title": format!("Story {}", i + 1), "url": url, "summary": "short" }))
        .collect();
    format!("Here you go:\n```json\n{}\n```", serde_json::Value::Array(items))
}
