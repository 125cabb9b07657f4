//! Content units, transcript messages, and conversation identity

use serde::{Deserialize, Serialize};

/// Image attachment (base64 encoded)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub data: String,
    pub mime_type: String,
}

impl ImageAttachment {
    /// Create an attachment from raw bytes
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        use base64::Engine;
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: mime_type.into(),
        }
    }
}

/// Persona attribution for a transcript message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Persona {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            icon: None,
            color: None,
        }
    }
}

/// A typed piece of a turn's output.
///
/// Tool variants carry an identifier used for deduplication: the same
/// identifier may appear across multiple inbound envelopes as a unit streams
/// to completion, but must appear exactly once in the final transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentUnit {
    /// Text content
    Text { text: String },
    /// Reasoning content
    Thinking { thinking: String },
    /// Tool invocation request
    #[serde(rename = "tool_use")]
    ToolInvocation {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
    },
    /// Result for a previously issued tool invocation
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentUnit {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create thinking content
    pub fn thinking(thinking: impl Into<String>) -> Self {
        Self::Thinking {
            thinking: thinking.into(),
        }
    }

    /// Create a tool invocation
    pub fn tool_invocation(
        id: impl Into<String>,
        name: impl Into<String>,
        input: Option<serde_json::Value>,
    ) -> Self {
        Self::ToolInvocation {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Create a tool result
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: serde_json::Value,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content,
            is_error,
        }
    }

    /// The deduplication key for tool units: the invocation id for a
    /// `ToolInvocation`, the back-reference for a `ToolResult`.
    pub fn invocation_id(&self) -> Option<&str> {
        match self {
            Self::ToolInvocation { id, .. } => Some(id),
            Self::ToolResult { tool_use_id, .. } => Some(tool_use_id),
            _ => None,
        }
    }

    /// Whether this unit belongs in the tool ledger
    pub fn is_tool_unit(&self) -> bool {
        self.invocation_id().is_some()
    }

    /// Flatten a tool result's content to plain text.
    ///
    /// The subprocess sends result content either as a bare string or as a
    /// list of `{type: "text", text}` blocks.
    pub fn result_text(content: &serde_json::Value) -> String {
        match content {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// The discriminated content payload of a transcript message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    /// Plain text
    Text { text: String },
    /// A single tool invocation or tool result surfaced as its own entry
    Unit { unit: ContentUnit },
    /// The full content-unit list of one turn
    Turn { units: Vec<ContentUnit> },
}

/// One ordered transcript entry.
///
/// The in-memory append order is the authoritative display order; the
/// async-assigned `persisted_id` never reorders it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: Role,
    pub payload: MessagePayload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
    /// Non-owning back-reference to another entry's persisted id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<Persona>,
    /// Assigned asynchronously after the optimistic in-memory append
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_id: Option<u64>,
    #[serde(default)]
    pub timestamp: i64,
}

impl TranscriptMessage {
    fn new(role: Role, payload: MessagePayload) -> Self {
        Self {
            role,
            payload,
            images: vec![],
            reply_to: None,
            persona: None,
            persisted_id: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create a user text message
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessagePayload::Text { text: text.into() })
    }

    /// Create a plain assistant text message
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessagePayload::Text { text: text.into() })
    }

    /// Create an assistant message carrying one turn's content units
    pub fn assistant_turn(units: Vec<ContentUnit>) -> Self {
        Self::new(Role::Assistant, MessagePayload::Turn { units })
    }

    /// Surface a single tool unit as a transcript entry
    pub fn tool_unit(unit: ContentUnit) -> Self {
        let role = match unit {
            ContentUnit::ToolResult { .. } => Role::User,
            _ => Role::Assistant,
        };
        Self::new(role, MessagePayload::Unit { unit })
    }

    /// Attach image content
    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }

    /// Attribute this message to a persona
    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = Some(persona);
        self
    }

    /// Combined text, for display and title derivation
    pub fn text(&self) -> String {
        match &self.payload {
            MessagePayload::Text { text } => text.clone(),
            MessagePayload::Unit { unit } => match unit {
                ContentUnit::Text { text } => text.clone(),
                ContentUnit::ToolResult { content, .. } => ContentUnit::result_text(content),
                _ => String::new(),
            },
            MessagePayload::Turn { units } => units
                .iter()
                .filter_map(|u| match u {
                    ContentUnit::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// Conversation identity and metadata. Identity is immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub working_dir: String,
    /// Path of the owning project
    pub project_path: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    /// Create a new conversation rooted in a project
    pub fn new(project_path: impl Into<String>, working_dir: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: None,
            working_dir: working_dir.into(),
            project_path: project_path.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_unit_invocation_id() {
        let inv = ContentUnit::tool_invocation("t1", "read_file", None);
        assert_eq!(inv.invocation_id(), Some("t1"));

        let res = ContentUnit::tool_result("t1", serde_json::json!("ok"), false);
        assert_eq!(res.invocation_id(), Some("t1"));

        assert_eq!(ContentUnit::text("hi").invocation_id(), None);
    }

    #[test]
    fn test_result_text_string_and_blocks() {
        assert_eq!(
            ContentUnit::result_text(&serde_json::json!("plain")),
            "plain"
        );
        let blocks = serde_json::json!([
            {"type": "text", "text": "line one"},
            {"type": "text", "text": "line two"},
        ]);
        assert_eq!(ContentUnit::result_text(&blocks), "line one\nline two");
        assert_eq!(ContentUnit::result_text(&serde_json::json!(null)), "");
    }

    #[test]
    fn test_tool_unit_roles() {
        let inv = TranscriptMessage::tool_unit(ContentUnit::tool_invocation("t1", "bash", None));
        assert_eq!(inv.role, Role::Assistant);

        let res = TranscriptMessage::tool_unit(ContentUnit::tool_result(
            "t1",
            serde_json::json!("done"),
            false,
        ));
        assert_eq!(res.role, Role::User);
    }

    #[test]
    fn test_content_unit_wire_names() {
        let inv = ContentUnit::tool_invocation("t1", "bash", Some(serde_json::json!({"cmd": "ls"})));
        let json = serde_json::to_value(&inv).unwrap();
        assert_eq!(json["type"], "tool_use");

        let parsed: ContentUnit = serde_json::from_value(serde_json::json!({
            "type": "tool_result",
            "tool_use_id": "t1",
            "content": "ok"
        }))
        .unwrap();
        assert_eq!(parsed.invocation_id(), Some("t1"));
    }

    #[test]
    fn test_transcript_text_over_turn_units() {
        let msg = TranscriptMessage::assistant_turn(vec![
            ContentUnit::thinking("hmm"),
            ContentUnit::text("hello "),
            ContentUnit::text("world"),
        ]);
        assert_eq!(msg.text(), "hello world");
    }
}
