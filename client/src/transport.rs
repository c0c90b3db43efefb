//! Transports carrying pulls and pushes to the reconciliation endpoint.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use shelfsync_engine::{ErrorBody, PullQuery, RawSyncPayload, SyncPayload};
use std::sync::Arc;

/// One round trip to the reconciliation endpoint.
///
/// Both calls return decoded payloads; rows that did not fit their shape are
/// listed in `rejected` instead of failing the call.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn pull(&self, query: &PullQuery) -> Result<SyncPayload>;

    async fn push(&self, payload: &SyncPayload) -> Result<SyncPayload>;
}

#[async_trait]
impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    async fn pull(&self, query: &PullQuery) -> Result<SyncPayload> {
        (**self).pull(query).await
    }

    async fn push(&self, payload: &SyncPayload) -> Result<SyncPayload> {
        (**self).push(payload).await
    }
}

/// Source of the bearer token for the signed-in user.
pub trait CredentialProvider: Send + Sync {
    /// `None` when nobody is signed in.
    fn token(&self) -> Option<String>;
}

/// A fixed token.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }
}

impl CredentialProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// [`SyncTransport`] over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let base = config.base_url.trim_end_matches('/');
        let endpoint = Url::parse(&format!("{base}/sync"))
            .map_err(|e| SyncError::Endpoint(format!("{}: {e}", config.base_url)))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint,
            credentials,
        })
    }

    /// URL of a pull request.
    pub fn pull_url(&self, query: &PullQuery) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("since", &query.since.to_string());
            if let Some(kind) = query.kind {
                pairs.append_pair("type", kind.as_str());
            }
            if let Some(book) = &query.book {
                pairs.append_pair("book", book);
            }
        }
        url
    }

    fn token(&self) -> Result<String> {
        self.credentials
            .token()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SyncError::Auth("no credential available".to_string()))
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn pull(&self, query: &PullQuery) -> Result<SyncPayload> {
        let token = self.token()?;
        let response = self
            .http
            .get(self.pull_url(query))
            .bearer_auth(token)
            .send()
            .await?;
        decode_response(response).await
    }

    async fn push(&self, payload: &SyncPayload) -> Result<SyncPayload> {
        let token = self.token()?;
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;
        decode_response(response).await
    }
}

async fn decode_response(response: reqwest::Response) -> Result<SyncPayload> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("").to_string());
        return Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Auth(message),
            _ => SyncError::Http {
                status: status.as_u16(),
                message,
            },
        });
    }

    let raw: RawSyncPayload = response
        .json()
        .await
        .map_err(|e| SyncError::Decode(e.to_string()))?;
    Ok(raw.decode())
}
