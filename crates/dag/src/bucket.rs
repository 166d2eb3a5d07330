use codec::{Message, Usage};
use serde::{Deserialize, Serialize};

/// The persisted content of one conversation turn: the user message the
/// client sent last, the assistant message that answered it, and the
/// metadata of the exchange. Buckets are owned by their node and never
/// mutated after insert, except for the usage backfill pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub user_message: Message,
    pub assistant_message: Message,
    /// Configured provider identifier of the route that recorded this turn.
    pub provider: String,
    pub model: String,
    /// Provider-native stop reason, untranslated.
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Usage,
    pub created_at: jiff::Timestamp,
    #[serde(default)]
    pub project: Option<String>,
}

impl Bucket {
    /// Concatenated textual projection of the turn, used for embedding.
    /// A turn whose messages carry no text blocks (tool-use only) projects
    /// to the empty string.
    pub fn extract_text(&self) -> String {
        let user = self.user_message.text();
        let assistant = self.assistant_message.text();

        if user.is_empty() {
            assistant
        } else if assistant.is_empty() {
            user
        } else {
            format!("{user}\n{assistant}")
        }
    }
}

#[cfg(test)]
mod tests {
    use codec::{ContentBlock, Role};

    use super::*;

    fn bucket(user: Message, assistant: Message) -> Bucket {
        Bucket {
            user_message: user,
            assistant_message: assistant,
            provider: "ollama".into(),
            model: "llama3".into(),
            stop_reason: None,
            usage: Usage::default(),
            created_at: jiff::Timestamp::UNIX_EPOCH,
            project: None,
        }
    }

    #[test]
    fn extract_text_joins_user_and_assistant() {
        let bucket = bucket(
            Message::from_text(Role::User, "hi"),
            Message::from_text(Role::Assistant, "hello"),
        );

        assert_eq!(bucket.extract_text(), "hi\nhello");
    }

    #[test]
    fn tool_use_only_turn_projects_empty() {
        let assistant = Message::new(
            Role::Assistant,
            vec![ContentBlock::ToolUse {
                id: "tu_1".into(),
                name: "search".into(),
                input: serde_json::json!({}),
            }],
        );
        let bucket = bucket(Message::new(Role::User, Vec::new()), assistant);

        assert_eq!(bucket.extract_text(), "");
    }
}
