use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::{
    config::models::ConsulSourceConfig,
    ports::kv_client::{KvClient, KvClientError, KvClientResult, KvEntry, KvListResponse, QueryOptions},
};

const INDEX_HEADER: &str = "x-consul-index";
const TOKEN_HEADER: &str = "x-consul-token";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvPairDto {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

/// KV transport over the Consul HTTP API.
///
/// Responsibilities:
/// * Recursive reads of `/v1/kv/{key}` with optional blocking (`index` + `wait`)
/// * Reading the version index from `X-Consul-Index`
/// * Decoding base64 values
/// * Plain PUT upserts
///
/// Retries are left to the caller.
#[derive(Debug, Clone)]
pub struct ConsulHttpClient {
    client: Client,
    address: Url,
    token: Option<String>,
    datacenter: Option<String>,
    request_timeout: Duration,
}

impl ConsulHttpClient {
    /// Create a client for the agent at `address`.
    pub fn new(address: &str) -> KvClientResult<Self> {
        let mut address = Url::parse(address)
            .map_err(|e| KvClientError::InvalidRequest(format!("Invalid address {address}: {e}")))?;
        // Url::join replaces the last segment unless the base ends with '/'.
        if !address.path().ends_with('/') {
            let path = format!("{}/", address.path());
            address.set_path(&path);
        }
        let client = Client::builder()
            .build()
            .map_err(|e| KvClientError::InvalidRequest(e.to_string()))?;

        tracing::info!(address = %address, "Created Consul KV client");
        Ok(Self {
            client,
            address,
            token: None,
            datacenter: None,
            request_timeout: Duration::from_secs(10),
        })
    }

    pub fn from_config(config: &ConsulSourceConfig) -> KvClientResult<Self> {
        let mut client = Self::new(&config.address)?.with_request_timeout(config.request_timeout());
        client.token = config.token.clone();
        client.datacenter = config.datacenter.clone();
        Ok(client)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn kv_url(&self, key: &str) -> KvClientResult<Url> {
        let encoded = key
            .trim_start_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        self.address
            .join(&format!("v1/kv/{encoded}"))
            .map_err(|e| KvClientError::InvalidRequest(format!("Invalid key {key}: {e}")))
    }

    /// Consul holds a blocking query for up to `wait + wait / 16`.
    fn blocking_timeout(&self, wait: Duration) -> Duration {
        wait + wait / 16 + self.request_timeout
    }

    fn last_index(headers: &HeaderMap) -> u64 {
        headers
            .get(INDEX_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    fn map_error(error: reqwest::Error, timeout: Duration) -> KvClientError {
        if error.is_timeout() {
            KvClientError::Timeout(timeout.as_millis())
        } else {
            KvClientError::ConnectionError(error.to_string())
        }
    }

    fn decode(pair: KvPairDto) -> KvClientResult<KvEntry> {
        let value = pair
            .value
            .map(|encoded| {
                STANDARD.decode(encoded).map(Bytes::from).map_err(|e| {
                    KvClientError::InvalidResponse(format!("Invalid base64 for {}: {e}", pair.key))
                })
            })
            .transpose()?;
        Ok(KvEntry {
            key: pair.key,
            value,
        })
    }
}

#[async_trait]
impl KvClient for ConsulHttpClient {
    async fn list(&self, key: &str, options: QueryOptions) -> KvClientResult<KvListResponse> {
        let url = self.kv_url(key)?;
        let mut request = self.client.get(url).query(&[("recurse", "true")]);
        if let Some(datacenter) = &self.datacenter {
            request = request.query(&[("dc", datacenter)]);
        }

        let mut timeout = self.request_timeout;
        if options.is_blocking() {
            request = request.query(&[("index", options.wait_index.to_string())]);
            if let Some(wait) = options.wait_time {
                request = request.query(&[("wait", format!("{}ms", wait.as_millis()))]);
                timeout = self.blocking_timeout(wait);
            }
        }
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }

        tracing::debug!(key, wait_index = options.wait_index, "Querying Consul KV");
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::map_error(e, timeout))?;

        let status = response.status();
        let last_index = Self::last_index(response.headers());
        if status != StatusCode::OK {
            return Ok(KvListResponse {
                status,
                entries: Vec::new(),
                last_index,
            });
        }

        let pairs: Vec<KvPairDto> = response
            .json()
            .await
            .map_err(|e| KvClientError::InvalidResponse(e.to_string()))?;
        let entries = pairs
            .into_iter()
            .map(Self::decode)
            .collect::<KvClientResult<Vec<_>>>()?;

        Ok(KvListResponse {
            status,
            entries,
            last_index,
        })
    }

    async fn put(&self, key: &str, value: Bytes) -> KvClientResult<bool> {
        let url = self.kv_url(key)?;
        let mut request = self.client.put(url).body(value);
        if let Some(datacenter) = &self.datacenter {
            request = request.query(&[("dc", datacenter)]);
        }
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| Self::map_error(e, self.request_timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(KvClientError::UnexpectedStatus(status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| KvClientError::InvalidResponse(e.to_string()))?;
        Ok(body.trim() == "true")
    }
}
