// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Conversation messages ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A file attached to a message.
///
/// `url` is either a data URL (`data:<mime>;base64,<b64>`) or an HTTPS URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub name: String,
    pub content_type: String,
    pub url: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

/// Parse a data URL of the form `data:<mime>;base64,<b64>` and return
/// `Ok((mime_type, base64_string))`.  Returns `Err` for non-data-URLs so
/// callers can fall back to treating the string as a plain HTTPS URL.
pub fn parse_data_url_parts(url: &str) -> Result<(String, String), &'static str> {
    let rest = url.strip_prefix("data:").ok_or("not a data URL")?;
    let (meta, b64) = rest.split_once(',').ok_or("malformed data URL")?;
    let mime = meta.strip_suffix(";base64").unwrap_or(meta).to_string();
    Ok((mime, b64.to_string()))
}

/// A single message in the conversation history.  Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            attachments: Vec::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

// ─── Generation parameters and results ───────────────────────────────────────

/// Per-request sampling options.  Every field is optional; providers fall
/// back to their own defaults and silently skip parameters they lack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl GenerationOptions {
    /// Copy of these options with `temperature` replaced.
    pub fn with_temperature(&self, temperature: f32) -> Self {
        Self { temperature: Some(temperature), ..self.clone() }
    }
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other,
}

impl FinishReason {
    /// Map OpenAI's `finish_reason` string.
    pub fn from_openai(s: &str) -> Self {
        match s {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "content_filter" => Self::ContentFilter,
            _ => Self::Other,
        }
    }

    /// Map Anthropic's `stop_reason` string.
    pub fn from_anthropic(s: &str) -> Self {
        match s {
            "end_turn" | "stop_sequence" => Self::Stop,
            "max_tokens" => Self::Length,
            "refusal" => Self::ContentFilter,
            _ => Self::Other,
        }
    }

    /// Map Gemini's `finishReason` string.
    pub fn from_google(s: &str) -> Self {
        match s {
            "STOP" => Self::Stop,
            "MAX_TOKENS" => Self::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => Self::ContentFilter,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Fold a partial usage report into this one.  Providers such as
    /// Anthropic report input and output counts in separate events, so a
    /// zero in `other` never erases a count seen earlier.
    pub fn merge(&mut self, other: TokenUsage) {
        if other.input_tokens > 0 {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens > 0 {
            self.output_tokens = other.output_tokens;
        }
    }
}

/// Derived likelihood of a candidate, or an explicit "unknown".
///
/// Serialised as a JSON number, or `null` when unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Confidence {
    Score(f64),
    #[default]
    Unknown,
}

impl Confidence {
    pub fn value(self) -> Option<f64> {
        match self {
            Confidence::Score(v) => Some(v),
            Confidence::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, Confidence::Score(_))
    }
}

impl From<Option<f64>> for Confidence {
    fn from(v: Option<f64>) -> Self {
        match v {
            Some(v) if v.is_finite() => Confidence::Score(v),
            _ => Confidence::Unknown,
        }
    }
}

impl From<Confidence> for Option<f64> {
    fn from(c: Confidence) -> Self {
        c.value()
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Score(v) => write!(f, "{v:.3}"),
            Confidence::Unknown => write!(f, "unknown"),
        }
    }
}

/// What a provider adapter hands back for one completed call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub content: String,
    pub confidence: Confidence,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<TokenUsage>,
}

/// Request sent to a provider adapter.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    /// Provider-scoped model id forwarded to the API.
    pub model: String,
    pub options: GenerationOptions,
    /// Ask the provider for token log-probabilities when it can supply them.
    pub logprobs: bool,
}

/// A single streamed event from a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    /// A text delta streamed from the model
    TextDelta(String),
    /// Log-probabilities for the tokens of the preceding delta(s).
    /// Entries the provider failed to report arrive as `NaN`.
    Logprobs(Vec<f64>),
    /// Usage statistics (possibly partial)
    Usage(TokenUsage),
    /// The model stopped for the given reason
    Finish(FinishReason),
    /// The stream finished normally
    Done,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_role_and_unique_ids() {
        let a = Message::user("hello");
        let b = Message::user("hello");
        assert_eq!(a.role, Role::User);
        assert_eq!(a.content, "hello");
        assert_ne!(a.id, b.id);
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::assistant("r").role, Role::Assistant);
    }

    #[test]
    fn message_serialises_camel_case() {
        let m = Message::user("hi").with_attachment(Attachment {
            name: "a.png".into(),
            content_type: "image/png".into(),
            url: "data:image/png;base64,AAA".into(),
        });
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["attachments"][0]["contentType"], "image/png");
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn message_without_attachments_field_deserialises() {
        let json = r#"{"id":"m1","role":"assistant","content":"x","timestamp":"2025-01-01T00:00:00Z"}"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert!(m.attachments.is_empty());
    }

    #[test]
    fn data_url_parts_are_split() {
        let (mime, b64) = parse_data_url_parts("data:image/jpeg;base64,QUJD").unwrap();
        assert_eq!(mime, "image/jpeg");
        assert_eq!(b64, "QUJD");
        assert!(parse_data_url_parts("https://example.com/cat.png").is_err());
    }

    #[test]
    fn with_temperature_keeps_other_options() {
        let base = GenerationOptions {
            max_tokens: Some(64),
            stop_sequences: vec!["END".into()],
            ..Default::default()
        };
        let o = base.with_temperature(0.7);
        assert_eq!(o.temperature, Some(0.7));
        assert_eq!(o.max_tokens, Some(64));
        assert_eq!(o.stop_sequences, vec!["END".to_string()]);
        assert_eq!(base.temperature, None);
    }

    #[test]
    fn options_omit_unset_fields() {
        let json = serde_json::to_string(&GenerationOptions::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn confidence_serialises_as_number_or_null() {
        assert_eq!(serde_json::to_string(&Confidence::Score(0.5)).unwrap(), "0.5");
        assert_eq!(serde_json::to_string(&Confidence::Unknown).unwrap(), "null");
        let c: Confidence = serde_json::from_str("0.25").unwrap();
        assert_eq!(c, Confidence::Score(0.25));
        let c: Confidence = serde_json::from_str("null").unwrap();
        assert_eq!(c, Confidence::Unknown);
    }

    #[test]
    fn confidence_from_non_finite_is_unknown() {
        assert_eq!(Confidence::from(Some(f64::NAN)), Confidence::Unknown);
        assert_eq!(Confidence::from(Some(f64::INFINITY)), Confidence::Unknown);
    }

    #[test]
    fn usage_merge_keeps_earlier_counts() {
        let mut u = TokenUsage { input_tokens: 12, output_tokens: 0 };
        u.merge(TokenUsage { input_tokens: 0, output_tokens: 30 });
        assert_eq!(u, TokenUsage { input_tokens: 12, output_tokens: 30 });
        assert_eq!(u.total(), 42);
    }

    #[test]
    fn finish_reason_mappings() {
        assert_eq!(FinishReason::from_openai("length"), FinishReason::Length);
        assert_eq!(FinishReason::from_anthropic("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::from_anthropic("max_tokens"), FinishReason::Length);
        assert_eq!(FinishReason::from_google("SAFETY"), FinishReason::ContentFilter);
        assert_eq!(FinishReason::from_google("WHATEVER"), FinishReason::Other);
    }
}
