use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use shared::{
    domain::{ConversationKey, GatewayConfig, MessageId, CONTACT_DOMAIN},
    error::SyncError,
    protocol::{
        ConnectionStateResponse, ProfilePictureRequest, ProfilePictureResponse, SendTextRequest,
        SendTextResponse,
    },
};
use tracing::debug;
use url::Url;

const API_KEY_HEADER: &str = "apikey";

/// Acknowledgement for an accepted outbound send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    /// Gateway-issued id, when the response carried one.
    pub message_id: Option<MessageId>,
}

/// HTTP surface of the messaging gateway.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    async fn connection_state(&self) -> Result<bool, SyncError>;
    /// Raw bulk history payload, in any of the gateway's list shapes.
    async fn fetch_messages(&self) -> Result<Value, SyncError>;
    async fn send_text(&self, key: &ConversationKey, text: &str) -> Result<SendReceipt, SyncError>;
    async fn fetch_profile_picture(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<String>, SyncError>;
}

/// Stand-in used while no gateway configuration is available.
pub struct MissingGateway;

#[async_trait]
impl GatewayApi for MissingGateway {
    async fn connection_state(&self) -> Result<bool, SyncError> {
        Err(SyncError::configuration_missing("gateway is not configured"))
    }

    async fn fetch_messages(&self) -> Result<Value, SyncError> {
        Err(SyncError::configuration_missing("gateway is not configured"))
    }

    async fn send_text(&self, key: &ConversationKey, _text: &str) -> Result<SendReceipt, SyncError> {
        Err(SyncError::configuration_missing(format!(
            "gateway is not configured, cannot send to {key}"
        )))
    }

    async fn fetch_profile_picture(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<String>, SyncError> {
        Err(SyncError::configuration_missing(format!(
            "gateway is not configured, cannot fetch avatar for {key}"
        )))
    }
}

pub struct HttpGateway {
    http: Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(http: Client, config: GatewayConfig) -> Self {
        Self { http, config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{path}/{}",
            self.config.base_url(),
            self.config.instance_name
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(API_KEY_HEADER, &self.config.api_key)
    }
}

#[async_trait]
impl GatewayApi for HttpGateway {
    async fn connection_state(&self) -> Result<bool, SyncError> {
        let response: ConnectionStateResponse = self
            .authorized(self.http.get(self.endpoint("instance/connectionState")))
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .map_err(malformed)?;
        Ok(response.is_connected())
    }

    async fn fetch_messages(&self) -> Result<Value, SyncError> {
        self.authorized(self.http.get(self.endpoint("message/fetch")))
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .map_err(malformed)
    }

    async fn send_text(&self, key: &ConversationKey, text: &str) -> Result<SendReceipt, SyncError> {
        let response: SendTextResponse = self
            .authorized(self.http.post(self.endpoint("message/text")))
            .json(&SendTextRequest::new(key.phone(), text))
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .unwrap_or_default();
        let message_id = response
            .key
            .and_then(|key| key.id)
            .filter(|id| !id.trim().is_empty())
            .map(MessageId);
        debug!(conversation = %key, message_id = ?message_id, "gateway: text sent");
        Ok(SendReceipt { message_id })
    }

    async fn fetch_profile_picture(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<String>, SyncError> {
        let request = ProfilePictureRequest {
            number: format!("{}@{CONTACT_DOMAIN}", key.phone()),
        };
        let response: ProfilePictureResponse = self
            .authorized(self.http.post(self.endpoint("chat/fetchProfilePictureUrl")))
            .json(&request)
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .map_err(malformed)?;
        Ok(response.url().filter(|url| is_web_url(url)))
    }
}

/// Only absolute `http(s)` URLs are usable as avatar references.
pub fn is_web_url(candidate: &str) -> bool {
    Url::parse(candidate.trim())
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .unwrap_or(false)
}

fn transport(err: reqwest::Error) -> SyncError {
    SyncError::transport(err.to_string())
}

fn malformed(err: reqwest::Error) -> SyncError {
    SyncError::malformed(err.to_string())
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
