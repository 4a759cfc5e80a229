use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One content part of a turn. Only text parts travel to the endpoints.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text { text: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UiMessage {
    pub id: String,
    pub role: Role,
    #[serde(deserialize_with = "text_parts_only")]
    pub parts: Vec<MessagePart>,
}

impl UiMessage {
    pub fn text(id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    /// Concatenation of every text part.
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .map(|p| match p {
                MessagePart::Text { text } => text.as_str(),
            })
            .collect()
    }
}

/// Saved conversations may carry tool calls, reasoning or file parts; those are dropped.
fn text_parts_only<'de, D>(de: D) -> Result<Vec<MessagePart>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(de)?;
    Ok(raw
        .into_iter()
        .filter_map(|v| serde_json::from_value::<MessagePart>(v).ok())
        .collect())
}

pub type Conversation = Vec<UiMessage>;

/// POST body sent to the chat and generation endpoints.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub messages: Conversation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

/// A completed assistant planning turn; its id guards against duplicate generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantTurn {
    pub id: String,
    pub text: String,
}

impl AssistantTurn {
    pub fn into_message(self) -> UiMessage {
        UiMessage::text(self.id, Role::Assistant, self.text)
    }
}
