//! The REST channel: typed request descriptors and the HTTP client that
//! executes them.

use alloy::primitives::B256;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use url::Url;

use holograph_types::{ArchivedDeployment, ArchivedJob};

use crate::error::DispatchError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

/// A deferred REST side effect. Requests are descriptors, not closures, so
/// the dispatcher can log, retry and serialize them.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ApiRequest {
    CrossChainTransaction {
        job: ArchivedJob,
    },
    CrossChainTransactionStatus {
        job_hash: B256,
        status: JobStatus,
    },
    ContractDeployment {
        deployment: ArchivedDeployment,
    },
}

impl ApiRequest {
    /// Method and path of the request, relative to the API base URL.
    fn route(&self) -> (reqwest::Method, String) {
        match self {
            Self::CrossChainTransaction { .. } => {
                (reqwest::Method::POST, "v1/cross-chain-transactions".into())
            },
            Self::CrossChainTransactionStatus { job_hash, .. } => (
                reqwest::Method::PATCH,
                format!("v1/cross-chain-transactions/{job_hash}"),
            ),
            Self::ContractDeployment { .. } => {
                (reqwest::Method::POST, "v1/contract-deployments".into())
            },
        }
    }
}

/// Executes [`ApiRequest`]s. The HTTP implementation is swapped for a logging
/// one in local environments.
#[async_trait]
pub trait ApiClient: Send + Sync + 'static {
    async fn execute(&self, request: &ApiRequest) -> Result<(), DispatchError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    access_token: String,
}

/// The real API client. Authenticates once at startup (operator key → JWT)
/// and attaches the JWT on every call.
#[derive(Debug)]
pub struct HttpApiClient {
    base: Url,
    client: reqwest::Client,
    jwt: RwLock<Option<String>>,
}

impl HttpApiClient {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            client: reqwest::Client::new(),
            jwt: RwLock::new(None),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, DispatchError> {
        self.base
            .join(path)
            .map_err(|err| DispatchError::Api(format!("bad api path {path:?}: {err}")))
    }

    /// Exchange the operator API key for a JWT.
    pub async fn authenticate(&self, api_key: &str) -> Result<(), DispatchError> {
        let url = self.endpoint("v1/auth/operator")?;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "hash": api_key }))
            .send()
            .await
            .map_err(|err| DispatchError::Auth(err.to_string()))?;
        if !response.status().is_success() {
            return Err(DispatchError::Auth(format!(
                "authentication rejected with status {}",
                response.status()
            )));
        }
        let auth: AuthResponse = response
            .json()
            .await
            .map_err(|err| DispatchError::Auth(err.to_string()))?;
        *self.jwt.write() = Some(auth.access_token);
        tracing::info!("authenticated against operator api");
        Ok(())
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn execute(&self, request: &ApiRequest) -> Result<(), DispatchError> {
        let (method, path) = request.route();
        let url = self.endpoint(&path)?;
        let mut builder = self.client.request(method, url).json(request);
        if let Some(jwt) = self.jwt.read().clone() {
            builder = builder.bearer_auth(jwt);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| DispatchError::Api(err.to_string()))?;
        if !response.status().is_success() {
            return Err(DispatchError::Api(format!(
                "api responded with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Local/experimental environments never call the network: log what would be
/// sent and report success.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingApiClient;

#[async_trait]
impl ApiClient for LoggingApiClient {
    async fn execute(&self, request: &ApiRequest) -> Result<(), DispatchError> {
        tracing::info!(
            request = %serde_json::to_string(request).unwrap_or_default(),
            "api call skipped in local environment"
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use alloy::primitives::b256;

    use super::*;

    #[test]
    fn test_routes() {
        let status = ApiRequest::CrossChainTransactionStatus {
            job_hash: b256!("00000000000000000000000000000000000000000000000000000000000000aa"),
            status: JobStatus::Completed,
        };
        let (method, path) = status.route();
        assert_eq!(method, reqwest::Method::PATCH);
        assert_eq!(
            path,
            "v1/cross-chain-transactions/0x00000000000000000000000000000000000000000000000000000000000000aa"
        );
    }

    #[test]
    fn test_request_serialization_tags_kind() {
        let request = ApiRequest::CrossChainTransactionStatus {
            job_hash: B256::ZERO,
            status: JobStatus::Failed,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["kind"], "crossChainTransactionStatus");
        assert_eq!(json["status"], "failed");
    }
}
