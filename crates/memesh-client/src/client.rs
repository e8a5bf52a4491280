use std::sync::Arc;
use std::time::Duration;

use memesh_api::{Conversation, Credential, Draft, Identity, Message, ProvisionedIdentity};
use memesh_core::backend::Backend;
use memesh_core::error::CoreError;
use reqwest::cookie::Jar;
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::HttpClientConfig;
use crate::error::{MemeshClientError, Result};
use crate::realtime::SocketIoConnector;
use crate::urls;

#[derive(Deserialize)]
struct SignupResponse {
    #[serde(flatten)]
    identity: Identity,
    #[serde(rename = "secretKey")]
    secret_key: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "secretKey")]
    secret_key: &'a str,
}

#[derive(Serialize)]
struct ProfileUpdate<'a> {
    #[serde(rename = "displayName")]
    display_name: &'a str,
}

/// REST client for the chat backend. The session lives in a cookie jar that
/// is shared with the real-time connector.
pub struct HttpBackend {
    base_url: String,
    http: reqwest::Client,
    jar: Arc<Jar>,
    cfg: HttpClientConfig,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, cfg: HttpClientConfig) -> Result<HttpBackend> {
        if cfg.timeout_ms == 0 {
            return Err(MemeshClientError::InvalidInput("timeout_ms"));
        }
        if cfg.connect_timeout_ms == 0 {
            return Err(MemeshClientError::InvalidInput("connect_timeout_ms"));
        }
        if cfg.max_response_bytes == 0 {
            return Err(MemeshClientError::InvalidInput("max_response_bytes"));
        }
        if cfg.user_agent.trim().is_empty() {
            return Err(MemeshClientError::InvalidInput("user_agent"));
        }
        let base_raw: String = base_url.into();
        let base = urls::validated_base(base_raw.as_str())?;
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .cookie_provider(jar.clone())
            .build()?;
        Ok(HttpBackend {
            base_url: base,
            http,
            jar,
            cfg,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Connector for the socket.io endpoint at `realtime_url`, or at the API
    /// base when none is given. It presents this client's session cookie.
    pub fn realtime_connector(&self, realtime_url: Option<&str>) -> Result<SocketIoConnector> {
        SocketIoConnector::new(
            &self.base_url,
            realtime_url.unwrap_or(&self.base_url),
            self.jar.clone(),
            Duration::from_millis(self.cfg.connect_timeout_ms),
        )
    }

    async fn request_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        payload: Option<&TReq>,
    ) -> Result<TResp> {
        let mut builder = self.http.request(method, url);
        if let Some(payload) = payload {
            builder = builder.json(payload);
        }
        let resp = builder.send().await?;
        self.handle_json_response(resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        self.request_json::<(), T>(Method::GET, url, None).await
    }

    async fn handle_json_response<T: DeserializeOwned>(&self, resp: Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            return Err(MemeshClientError::Status(status.as_u16()));
        }
        let body = resp.bytes().await?;
        if body.len() > self.cfg.max_response_bytes {
            return Err(MemeshClientError::ResponseTooLarge);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait::async_trait]
impl Backend for HttpBackend {
    async fn provision_identity(&self) -> std::result::Result<ProvisionedIdentity, CoreError> {
        let url = urls::signup(&self.base_url)?;
        let resp: SignupResponse = self.request_json::<(), _>(Method::POST, url, None).await?;
        Ok(ProvisionedIdentity {
            identity: resp.identity,
            credential: Credential::new(resp.secret_key),
        })
    }

    async fn authenticate(&self, credential: &Credential) -> std::result::Result<Identity, CoreError> {
        let url = urls::login(&self.base_url)?;
        let body = LoginRequest {
            secret_key: credential.expose(),
        };
        match self.request_json(Method::POST, url, Some(&body)).await {
            Ok(identity) => Ok(identity),
            Err(MemeshClientError::Status(400 | 401)) => Err(CoreError::InvalidCredential),
            Err(err) => Err(err.into()),
        }
    }

    async fn logout(&self) -> std::result::Result<(), CoreError> {
        let url = urls::logout(&self.base_url)?;
        let resp = self.http.post(url).send().await.map_err(MemeshClientError::from)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MemeshClientError::Status(status.as_u16()).into());
        }
        Ok(())
    }

    async fn check_session(&self) -> std::result::Result<Identity, CoreError> {
        let url = urls::check(&self.base_url)?;
        Ok(self.get_json(url).await?)
    }

    async fn update_display_name(&self, name: &str) -> std::result::Result<Identity, CoreError> {
        let url = urls::update_profile(&self.base_url)?;
        let body = ProfileUpdate { display_name: name };
        Ok(self.request_json(Method::PUT, url, Some(&body)).await?)
    }

    async fn list_peers(&self) -> std::result::Result<Vec<Identity>, CoreError> {
        let url = urls::users(&self.base_url)?;
        Ok(self.get_json(url).await?)
    }

    async fn fetch_history(
        &self,
        conversation: &Conversation,
    ) -> std::result::Result<Vec<Message>, CoreError> {
        let url = urls::history(&self.base_url, conversation)?;
        Ok(self.get_json(url).await?)
    }

    async fn send_message(
        &self,
        conversation: &Conversation,
        draft: &Draft,
    ) -> std::result::Result<Message, CoreError> {
        let url = urls::send(&self.base_url, conversation)?;
        Ok(self.request_json(Method::POST, url, Some(draft)).await?)
    }
}
