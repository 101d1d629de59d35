use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::wire::null_as_default;

/// Content block type the agent service uses for plain text.
pub const TEXT_BLOCK_TYPE: i64 = 2;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Conversation {
    #[serde(default, deserialize_with = "null_as_default")]
    pub conversation: ConversationMeta,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationMeta {
    #[serde(default, deserialize_with = "null_as_default")]
    pub conversation_id: String,
    /// Present on newer service versions; authoritative when set.
    #[serde(default)]
    pub working: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub end_of_turn: bool,
    /// Kept raw: only agent messages carry the `{"Content": [...]}` shape.
    #[serde(default)]
    pub llm_data: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmData {
    #[serde(rename = "Content", default, deserialize_with = "null_as_default")]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(rename = "Type", default, deserialize_with = "null_as_default")]
    kind: i64,
    #[serde(rename = "Text", default, deserialize_with = "null_as_default")]
    text: String,
}

impl Message {
    pub fn is_agent(&self) -> bool {
        self.kind == "agent"
    }

    fn first_text(&self) -> Option<String> {
        let data: LlmData = serde_json::from_value(self.llm_data.clone()).ok()?;
        data.content
            .into_iter()
            .find(|b| b.kind == TEXT_BLOCK_TYPE && !b.text.is_empty())
            .map(|b| b.text)
    }
}

impl Conversation {
    /// Uses the `working` flag when the service reports it, otherwise the
    /// end-of-turn marker on the most recent agent message.
    pub fn is_complete(&self) -> bool {
        if let Some(working) = self.conversation.working {
            return !working;
        }
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_agent())
            .map(|m| m.end_of_turn)
            .unwrap_or(false)
    }

    /// Text of the most recent agent message that has a text block.
    pub fn last_agent_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.is_agent())
            .find_map(Message::first_text)
            .unwrap_or_default()
    }
}

/// Entry of the conversation listing endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationSummary {
    #[serde(default, deserialize_with = "null_as_default")]
    pub conversation_id: String,
    #[serde(default)]
    pub parent_conversation_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    /// Set for interactive sessions; API-created conversations have none.
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateRequest<'a> {
    pub message: &'a str,
    pub model: &'a str,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub conversation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agent(end_of_turn: bool, text: Option<&str>) -> Value {
        let content = match text {
            Some(t) => json!([{ "Type": 5, "Text": "" }, { "Type": 2, "Text": t }]),
            None => json!([{ "Type": 5 }]),
        };
        json!({ "type": "agent", "end_of_turn": end_of_turn, "llm_data": { "Content": content } })
    }

    fn parse(v: Value) -> Conversation {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn working_flag_wins_over_messages() {
        let conv = parse(json!({
            "conversation": { "conversation_id": "c1", "working": true },
            "messages": [agent(true, Some("done"))]
        }));
        assert!(!conv.is_complete());

        let conv = parse(json!({
            "conversation": { "conversation_id": "c1", "working": false },
            "messages": []
        }));
        assert!(conv.is_complete());
    }

    #[test]
    fn completion_falls_back_to_last_agent_end_of_turn() {
        let conv = parse(json!({
            "conversation": { "conversation_id": "c1" },
            "messages": [
                agent(false, Some("thinking")),
                agent(true, Some("[]")),
                { "type": "user", "end_of_turn": false, "llm_data": null }
            ]
        }));
        assert!(conv.is_complete());

        let conv = parse(json!({
            "conversation": { "conversation_id": "c1" },
            "messages": [agent(true, None), agent(false, None)]
        }));
        assert!(!conv.is_complete());
        assert!(!Conversation::default().is_complete());
    }

    #[test]
    fn last_agent_text_skips_messages_without_text() {
        let conv = parse(json!({
            "conversation": { "conversation_id": "c1" },
            "messages": [
                agent(false, Some("first answer")),
                agent(true, None),
                { "type": "user", "llm_data": { "Content": [{ "Type": 2, "Text": "user text" }] } }
            ]
        }));
        assert_eq!(conv.last_agent_text(), "first answer");
        assert_eq!(Conversation::default().last_agent_text(), "");
    }

    #[test]
    fn null_fields_fall_back_to_defaults() {
        let conv = parse(json!({
            "conversation": { "conversation_id": null, "working": null },
            "messages": [
                { "type": null, "end_of_turn": null, "llm_data": null },
                { "type": "agent", "end_of_turn": true, "llm_data": { "Content": null } },
                agent(true, Some("answer"))
            ]
        }));
        assert_eq!(conv.conversation.conversation_id, "");
        assert_eq!(conv.messages[0].kind, "");
        assert!(!conv.messages[0].end_of_turn);
        assert_eq!(conv.last_agent_text(), "answer");
        assert!(conv.is_complete());

        let conv = parse(json!({ "conversation": null, "messages": null }));
        assert!(conv.messages.is_empty());

        let listing: Vec<ConversationSummary> = serde_json::from_value(json!([
            { "conversation_id": null, "created_at": "2020-01-01T00:00:00Z" },
            { "created_at": null },
            { "conversation_id": "c1", "parent_conversation_id": null }
        ]))
        .unwrap();
        assert_eq!(listing[0].conversation_id, "");
        assert_eq!(listing[1].conversation_id, "");
        assert_eq!(listing[2].conversation_id, "c1");

        let created: CreateResponse =
            serde_json::from_value(json!({ "conversation_id": null })).unwrap();
        assert_eq!(created.conversation_id, "");
    }
}
