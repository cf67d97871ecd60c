//! Outbound notifications.
//!
//! The alert engine only knows the `Notifier` trait: a channel id and a
//! text. `SlackNotifier` posts through the Slack Web API; `SilentNotifier`
//! logs what would have been sent, for dry runs and local testing.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::logging::{self, DataSource};
use crate::model::NotifyError;

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Sends one text message to one channel. Implementations never retry.
pub trait Notifier {
    fn send(&self, channel_id: &str, text: &str) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// Slack
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    error: Option<String>,
}

pub struct SlackNotifier {
    client: reqwest::blocking::Client,
    token: String,
    api_url: String,
}

impl SlackNotifier {
    pub fn new(token: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            token: token.into(),
            api_url: SLACK_POST_MESSAGE_URL.to_string(),
        })
    }

    /// Points the notifier at a different endpoint (Slack-compatible relays).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

/// Message body for `chat.postMessage`: plain text plus one mrkdwn section.
pub fn build_slack_payload(channel_id: &str, text: &str) -> serde_json::Value {
    json!({
        "channel": channel_id,
        "text": text,
        "blocks": [
            { "type": "section", "text": { "type": "mrkdwn", "text": text } }
        ]
    })
}

impl Notifier for SlackNotifier {
    fn send(&self, channel_id: &str, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(&build_slack_payload(channel_id, text))
            .send()?;

        if !response.status().is_success() {
            return Err(NotifyError::HttpError(response.status().as_u16()));
        }

        // Slack answers 200 even for refused messages; the verdict is in the body.
        let body: SlackResponse = response.json()?;
        if body.ok {
            Ok(())
        } else {
            Err(NotifyError::Rejected(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Silent mode
// ---------------------------------------------------------------------------

/// Logs messages instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn send(&self, channel_id: &str, text: &str) -> Result<(), NotifyError> {
        logging::info(
            DataSource::Slack,
            None,
            &format!("silent mode, not sent to {}: {}", channel_id, text),
        );
        Ok(())
    }
}

/// Slack, or the silent logger when `silent` is set.
pub fn build_notifier(silent: bool, slack_token: &str) -> Result<Box<dyn Notifier>, NotifyError> {
    if silent {
        Ok(Box::new(SilentNotifier))
    } else {
        Ok(Box::new(SlackNotifier::new(slack_token)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_carries_channel_text_and_mrkdwn_block() {
        let payload = build_slack_payload("C123", "🚰 *Water flow alert*");
        assert_eq!(payload["channel"], "C123");
        assert_eq!(payload["text"], "🚰 *Water flow alert*");
        assert_eq!(payload["blocks"][0]["text"]["type"], "mrkdwn");
        assert_eq!(payload["blocks"][0]["text"]["text"], "🚰 *Water flow alert*");
    }

    #[test]
    fn test_slack_error_body_deserializes() {
        let body: SlackResponse =
            serde_json::from_str(r#"{"ok":false,"error":"channel_not_found"}"#).unwrap();
        assert!(!body.ok);
        assert_eq!(body.error.as_deref(), Some("channel_not_found"));
    }

    #[test]
    fn test_silent_notifier_always_succeeds() {
        assert!(SilentNotifier.send("C123", "hello").is_ok());
    }
}
