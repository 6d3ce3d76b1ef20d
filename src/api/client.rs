use super::types::{StartConversationRequest, StartConversationResponse, UpdateConversationRequest};
use crate::config::{BackendConfig, Credential};
use crate::error::{Result, SyncError};
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, info};
use url::Url;

/// Conversation REST endpoints used by the participant client
#[async_trait::async_trait]
pub trait ConversationApi: Send + Sync {
    /// Create a conversation
    async fn start_conversation(
        &self,
        request: &StartConversationRequest,
    ) -> Result<StartConversationResponse>;

    /// Append messages to an in-progress conversation
    async fn update_conversation(
        &self,
        conversation_id: &str,
        request: &UpdateConversationRequest,
    ) -> Result<()>;
}

/// reqwest-backed [`ConversationApi`]
pub struct HttpConversationApi {
    client: Client,
    base: Url,
    credential: Option<Credential>,
    tenant_id: Option<String>,
}

impl HttpConversationApi {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base: base_url(&config.api_base)?,
            credential: config.credential(),
            tenant_id: config.tenant_id.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    fn authorize(&self, mut builder: RequestBuilder) -> RequestBuilder {
        builder = match &self.credential {
            Some(Credential::ApiKey(key)) => builder.header("X-API-Key", key),
            Some(Credential::AccessToken(token)) => builder.bearer_auth(token),
            None => builder,
        };
        if let Some(tenant) = &self.tenant_id {
            builder = builder.header("X-Tenant-Id", tenant);
        }
        builder
    }
}

/// Ensure the base ends with `/` so relative joins keep its path
fn base_url(raw: &str) -> Result<Url> {
    let mut base = Url::parse(raw)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Http {
        status: status.as_u16(),
        body,
    })
}

#[async_trait::async_trait]
impl ConversationApi for HttpConversationApi {
    async fn start_conversation(
        &self,
        request: &StartConversationRequest,
    ) -> Result<StartConversationResponse> {
        let url = self.endpoint("conversations/start")?;
        info!("Starting conversation via {}", url);

        let response = self
            .authorize(self.client.post(url))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: StartConversationResponse = response.json().await?;
        info!("Conversation started: {}", body.conversation_id);
        Ok(body)
    }

    async fn update_conversation(
        &self,
        conversation_id: &str,
        request: &UpdateConversationRequest,
    ) -> Result<()> {
        let url = self.endpoint(&format!("conversations/update/{}", conversation_id))?;
        debug!(
            "Sending {} message(s) to conversation {}",
            request.messages.len(),
            conversation_id
        );

        let response = self
            .authorize(self.client.patch(url))
            .json(request)
            .send()
            .await?;
        check_status(response).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_keeps_path() {
        let base = base_url("https://example.com/api/v1").unwrap();
        assert_eq!(
            base.join("conversations/start").unwrap().as_str(),
            "https://example.com/api/v1/conversations/start"
        );
    }

    #[test]
    fn test_rejects_relative_base() {
        assert!(matches!(base_url("api/v1"), Err(SyncError::UrlParse(_))));
    }
}
