use crate::models::{Message, Role};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

pub(crate) const MENSTRUATION_REPLY: &str = "Menstruation is a natural part of a woman's reproductive cycle. If you're experiencing unusual symptoms or have specific questions about your period, I'm here to help. Remember that cycle lengths and flow can vary between individuals, and it's always a good idea to track your cycle to understand your own patterns.";
const PREGNANCY_REPLY: &str = "Pregnancy is a significant journey with many physical and emotional changes. It's important to seek regular prenatal care if you are pregnant or think you might be. I can provide general information, but your healthcare provider should be your primary source of guidance during pregnancy.";
const CONTRACEPTION_REPLY: &str = "There are many birth control options available, each with different effectiveness rates, side effects, and considerations. The best choice depends on your personal health history, preferences, and needs. I recommend discussing these options with a healthcare provider who can help you make an informed decision.";
const GENERAL_REPLY: &str = "Thank you for sharing. Women's health encompasses many aspects of wellbeing, from physical health to emotional and social wellness. If you have a specific concern or topic you'd like to explore further, please let me know and I'll do my best to provide supportive, evidence-based information.";

#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    #[error("failed to reach chat webhook: {0}")]
    Network(#[from] reqwest::Error),
    #[error("chat webhook returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("no user message to respond to")]
    NothingToAnswer,
}

// Produces assistant replies for a conversation
#[async_trait]
pub trait ChatResponder: Send + Sync {
    /// `history` is the full conversation, oldest first, ending with the
    /// user message being answered.
    async fn respond(&self, history: &[Message]) -> Result<String, ResponderError>;
}

fn latest_user_text(history: &[Message]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.text.as_str())
}

// --- Keyword responder ---

/// Canned replies picked by keyword, first match wins.
pub struct KeywordResponder {
    rules: Vec<(&'static [&'static str], &'static str)>,
    fallback: &'static str,
}

impl KeywordResponder {
    pub fn new() -> Self {
        Self {
            rules: vec![
                (&["period", "menstruation"][..], MENSTRUATION_REPLY),
                (&["pregnancy", "pregnant"][..], PREGNANCY_REPLY),
                (&["birth control", "contraception"][..], CONTRACEPTION_REPLY),
            ],
            fallback: GENERAL_REPLY,
        }
    }

    pub fn reply_for(&self, input: &str) -> &'static str {
        let lowercase_input = input.to_lowercase();
        self.rules
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| lowercase_input.contains(k)))
            .map(|(_, reply)| *reply)
            .unwrap_or(self.fallback)
    }
}

impl Default for KeywordResponder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatResponder for KeywordResponder {
    async fn respond(&self, history: &[Message]) -> Result<String, ResponderError> {
        let input = latest_user_text(history).ok_or(ResponderError::NothingToAnswer)?;
        Ok(self.reply_for(input).to_string())
    }
}

// --- Webhook responder ---

/// How much of the conversation is sent along with the latest message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryMode {
    LatestOnly,
    Full,
}

#[derive(Serialize, Debug)]
struct WebhookRequestBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    history: Option<&'a [Message]>,
}

pub struct WebhookResponder {
    client: Client,
    url: String,
    history_mode: HistoryMode,
}

impl WebhookResponder {
    pub fn new(url: impl Into<String>, history_mode: HistoryMode) -> Self {
        Self { client: Client::new(), url: url.into(), history_mode }
    }
}

#[async_trait]
impl ChatResponder for WebhookResponder {
    async fn respond(&self, history: &[Message]) -> Result<String, ResponderError> {
        let message = latest_user_text(history).ok_or(ResponderError::NothingToAnswer)?;
        log::info!("Sending message to chat webhook: {} ({:?})", self.url, self.history_mode);

        let body = WebhookRequestBody {
            message,
            history: match self.history_mode {
                HistoryMode::Full => Some(history),
                HistoryMode::LatestOnly => None,
            },
        };

        let response = self.client.post(&self.url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_else(|_| "<Failed to read error body>".to_string());
            log::error!("Chat webhook failed with status {}: {}", status, error_body);
            return Err(ResponderError::Status { status: status.as_u16(), body: error_body });
        }

        let text = response.text().await?;
        Ok(extract_reply(&text))
    }
}

// --- Reply extraction ---

type ExtractionRule = fn(&Value) -> Option<String>;

fn content_field(value: &Value) -> Option<String> {
    value.get("content")?.as_str().map(str::to_string)
}

fn reply_field(value: &Value) -> Option<String> {
    value.get("reply")?.as_str().map(str::to_string)
}

fn nested_reply_content(value: &Value) -> Option<String> {
    value.get("reply")?.get("content")?.as_str().map(str::to_string)
}

fn stringify(value: &Value) -> Option<String> {
    Some(value.to_string())
}

const EXTRACTION_RULES: &[ExtractionRule] = &[content_field, reply_field, nested_reply_content, stringify];

/// Pulls the reply text out of a webhook response body. JSON bodies go
/// through the extraction rules in order; anything else is plain text.
pub fn extract_reply(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => EXTRACTION_RULES
            .iter()
            .find_map(|rule| rule(&value))
            .unwrap_or_default(),
        Err(_) => body.to_string(),
    }
}
