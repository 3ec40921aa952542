//! Remote agent client
//!
//! The agent receives a transcript and eventually answers with reply text.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::{Error, Result};

/// Something that answers a transcript with text to speak
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Send a transcript and wait for the reply
    ///
    /// # Errors
    ///
    /// Returns error if the agent is unreachable or the reply is malformed
    async fn ask(&self, text: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct AgentRequest<'a> {
    text: &'a str,
    device_id: &'a str,
    request_id: String,
}

/// Agent reply body; `response` is accepted as an alias for `text`
#[derive(Debug, Deserialize)]
pub struct AgentReply {
    #[serde(alias = "response")]
    pub text: String,
}

/// JSON-over-HTTP agent
pub struct HttpAgent {
    client: reqwest::Client,
    url: String,
    device_id: String,
}

impl HttpAgent {
    /// Create a client from agent settings
    ///
    /// # Errors
    ///
    /// Returns error if no URL is configured or the client cannot be built
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::Config("agent URL required (BEACON_VOICE_AGENT_URL)".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url,
            device_id: config.device_id.clone(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AgentClient for HttpAgent {
    async fn ask(&self, text: &str) -> Result<String> {
        let request = AgentRequest {
            text,
            device_id: &self.device_id,
            request_id: uuid::Uuid::new_v4().to_string(),
        };
        tracing::debug!(request_id = %request.request_id, url = %self.url, "sending transcript to agent");

        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "agent error");
            return Err(Error::Agent(format!("agent returned {status}: {body}")));
        }

        let reply: AgentReply = response.json().await?;
        tracing::debug!(request_id = %request.request_id, chars = reply.text.len(), "agent replied");
        Ok(reply.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_accepts_text_or_response() {
        let a: AgentReply = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(a.text, "hi");
        let b: AgentReply = serde_json::from_str(r#"{"response":"yo","extra":1}"#).unwrap();
        assert_eq!(b.text, "yo");
        assert!(serde_json::from_str::<AgentReply>(r#"{"other":"x"}"#).is_err());
    }

    #[test]
    fn test_request_shape() {
        let request = AgentRequest {
            text: "what time is it",
            device_id: "kitchen",
            request_id: "r1".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["text"], "what time is it");
        assert_eq!(json["device_id"], "kitchen");
        assert_eq!(json["request_id"], "r1");
    }

    #[test]
    fn test_requires_url() {
        assert!(matches!(
            HttpAgent::new(&AgentConfig::default()),
            Err(Error::Config(_))
        ));
        let config = AgentConfig {
            url: Some("http://localhost:9000/voice".to_string()),
            ..AgentConfig::default()
        };
        assert_eq!(HttpAgent::new(&config).unwrap().url(), "http://localhost:9000/voice");
    }
}
