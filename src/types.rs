use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a message within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Parse a provider-supplied role string. Anything outside the known
    /// set is treated as `User`.
    pub fn from_str_lossy(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single content unit of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    File {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Data {
        bytes: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A role-tagged message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::text(text)])
    }

    /// Concatenation of all text parts, ignoring files and data.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }
}

/// The conversation state handed to a step.
///
/// Immutable once built. The pipeline builds a fresh prompt from each
/// step's [`Generation`] before invoking the next step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Prompt {
    messages: Vec<Message>,
}

impl Prompt {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// A prompt holding a single user text message.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(vec![Message::user(text)])
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Text of the newest message, or an empty string.
    pub fn latest_text(&self) -> String {
        self.messages.last().map(Message::text).unwrap_or_default()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl From<&Generation> for Prompt {
    fn from(generation: &Generation) -> Self {
        Prompt::new(generation.messages.clone())
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let texts: Vec<String> = self.messages.iter().map(Message::text).collect();
        f.write_str(&texts.join("\n"))
    }
}

/// Output of a single step invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Generation {
    pub messages: Vec<Message>,
}

impl Generation {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// A generation holding a single assistant text message.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(vec![Message::assistant(text)])
    }

    /// Text of the newest assistant message, or an empty string when the
    /// generation holds no assistant message.
    pub fn text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(Message::text)
            .unwrap_or_default()
    }
}

impl From<Prompt> for Generation {
    fn from(prompt: Prompt) -> Self {
        Generation::new(prompt.into_messages())
    }
}
