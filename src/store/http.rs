use async_trait::async_trait;
use crate::models::{ extract_error_message, CreateMessageRequest, Message, MessageListResponse };
use super::{ MessageStore, StoreError };
use log::debug;
use reqwest::header::{ ACCEPT, AUTHORIZATION };
use reqwest::{ Client as HttpClient, RequestBuilder, Response };
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpMessageStore {
    http: HttpClient,
    base_url: Url,
}

impl HttpMessageStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        Self::with_client(HttpClient::new(), base_url)
    }

    pub fn with_client(http: HttpClient, base_url: &str) -> Result<Self, StoreError> {
        let base_url = Url::parse(base_url).map_err(|e|
            StoreError::Endpoint(format!("{}: {}", base_url, e))
        )?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::Endpoint(format!("{} cannot be used as a base URL", base_url)));
        }
        Ok(Self { http, base_url })
    }

    /// `{base}/events/{id}/messages/`, keeping any path prefix of the base.
    pub fn messages_url(&self, conversation_id: &str) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Endpoint(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(&["events", conversation_id, "messages", ""]);
        Ok(url)
    }

    fn authorize(req: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token {
            Some(token) => req.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => req,
        }
    }

    async fn reject(resp: Response) -> StoreError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        StoreError::Status {
            status,
            message: extract_error_message(&body),
        }
    }
}

#[async_trait]
impl MessageStore for HttpMessageStore {
    async fn list_messages(
        &self,
        conversation_id: &str,
        token: Option<&str>
    ) -> Result<Vec<Message>, StoreError> {
        let url = self.messages_url(conversation_id)?;
        debug!("GET {}", url);

        let req = self.http.get(url).header(ACCEPT, "application/json");
        let resp = Self::authorize(req, token).send().await?;
        if !resp.status().is_success() {
            return Err(Self::reject(resp).await);
        }

        let body = resp.text().await?;
        let list: MessageListResponse = serde_json::from_str(&body)
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(list.into_messages())
    }

    async fn create_message(
        &self,
        conversation_id: &str,
        token: &str,
        content: &str
    ) -> Result<Message, StoreError> {
        let url = self.messages_url(conversation_id)?;
        debug!("POST {}", url);

        let req = self.http
            .post(url)
            .header(ACCEPT, "application/json")
            .json(&CreateMessageRequest { content });
        let resp = Self::authorize(req, Some(token)).send().await?;
        if !resp.status().is_success() {
            return Err(Self::reject(resp).await);
        }

        let body = resp.text().await?;
        serde_json::from_str::<Message>(&body).map_err(|e| StoreError::Decode(e.to_string()))
    }
}
