use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use super::Publisher;
use crate::config::NotifyConfig;
use crate::error::WatchError;
use crate::signing::{SigV4Signer, FORM_CONTENT_TYPE};

const SNS_API_VERSION: &str = "2010-03-31";

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(rename = "PublishResult")]
    publish_result: PublishResult,
}

#[derive(Debug, Deserialize)]
struct PublishResult {
    #[serde(rename = "MessageId")]
    message_id: String,
}

/// AWS SNS publisher speaking the Query API directly.
pub struct SnsPublisher {
    endpoint: String,
    host: String,
    signer: SigV4Signer,
    http: reqwest::Client,
}

impl SnsPublisher {
    pub fn new(config: &NotifyConfig) -> Result<Self, WatchError> {
        let host = format!("sns.{}.amazonaws.com", config.region);
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| WatchError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: format!("https://{host}/"),
            signer: SigV4Signer::new(
                &config.access_key_id,
                &config.secret_access_key,
                config.session_token.as_deref(),
                &config.region,
                "sns",
            ),
            host,
            http,
        })
    }
}

#[async_trait]
impl Publisher for SnsPublisher {
    async fn publish(&self, topic: &str, subject: &str, body: &str) -> Result<String, WatchError> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("Action", "Publish")
            .append_pair("Version", SNS_API_VERSION)
            .append_pair("TopicArn", topic)
            .append_pair("Subject", subject)
            .append_pair("Message", body)
            .finish();

        let signed = self.signer.sign_form_post(&self.host, &form, Utc::now())?;

        let mut req = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", FORM_CONTENT_TYPE)
            .header("X-Amz-Date", &signed.amz_date)
            .header("Authorization", &signed.authorization);
        if let Some(token) = &signed.security_token {
            req = req.header("X-Amz-Security-Token", token);
        }

        let resp = req
            .body(form)
            .send()
            .await
            .map_err(|e| WatchError::Publish(format!("SNS request failed: {e}")))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(WatchError::Publish(format!("SNS returned HTTP {status}: {text}")));
        }

        parse_message_id(&text)
    }
}

/// Pull the `MessageId` out of a `PublishResponse` document.
fn parse_message_id(xml: &str) -> Result<String, WatchError> {
    let resp: PublishResponse = quick_xml::de::from_str(xml)
        .map_err(|e| WatchError::Publish(format!("Failed to parse SNS response: {e}")))?;
    Ok(resp.publish_result.message_id.trim().to_string())
}
