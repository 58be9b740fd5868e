//! Remote registry build session
//!
//! Connection settings, the authenticated session handle and the HTTP
//! transport of the registry build service.

use crate::bridge::BridgeWriter;
use crate::client::BuildContext;
use crate::error::{BuildError, BuildResult};
use crate::reference::ImageReference;
use crate::request::BuildRequest;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// Header carrying the account the build is billed to
pub const ACCOUNT_HEADER: &str = "account";

/// Registry build service abstraction trait
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Run a build, uploading `context` and copying the build output into `output`
    ///
    /// Returns once the service has finished sending output.
    async fn image_build(
        &self,
        request: &BuildRequest,
        context: BuildContext,
        headers: &HeaderMap,
        output: &mut BridgeWriter,
    ) -> BuildResult<()>;
}

/// Authenticated handle to the registry build service
#[derive(Clone)]
pub struct RegistrySession {
    pub builds: Arc<dyn BuildService>,

    /// Headers sent with every build request (authorization, account)
    pub build_target_header: HeaderMap,
}

impl RegistrySession {
    pub fn new(builds: Arc<dyn BuildService>, build_target_header: HeaderMap) -> Self {
        Self {
            builds,
            build_target_header,
        }
    }
}

/// Establishes a registry session for an image name
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Returns the session and the canonical image name to build
    async fn connect(&self, tag: &str) -> BuildResult<(RegistrySession, String)>;
}

/// Connection settings for the registry build service
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Build endpoint URL (defaults to `https://<registry>/api/v1/builds`)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API token sent as a bearer token
    #[serde(default)]
    pub token: Option<String>,

    /// Account the build runs under
    #[serde(default)]
    pub account: Option<String>,
}

impl SessionConfig {
    /// Load settings from the config file, then apply environment overrides
    ///
    /// Priority:
    /// 1. `CRBUILD_ENDPOINT`, `CRBUILD_TOKEN`, `CRBUILD_ACCOUNT`
    /// 2. Config file (`CRBUILD_CONFIG` or `<config_dir>/crbuild/config.json`)
    pub fn load() -> BuildResult<Self> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        if let Ok(endpoint) = std::env::var("CRBUILD_ENDPOINT") {
            config.endpoint = Some(endpoint);
        }
        if let Ok(token) = std::env::var("CRBUILD_TOKEN") {
            config.token = Some(token);
        }
        if let Ok(account) = std::env::var("CRBUILD_ACCOUNT") {
            config.account = Some(account);
        }

        Ok(config)
    }

    /// Path of the config file
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CRBUILD_CONFIG") {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("crbuild").join("config.json"))
    }

    /// Read settings from a JSON file
    pub fn from_file(path: &Path) -> BuildResult<Self> {
        tracing::debug!("Loading session config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            BuildError::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

/// Session connector backed by [`SessionConfig`] and [`HttpBuildService`]
pub struct RegistryConnector {
    config: SessionConfig,
    client: reqwest::Client,
}

impl RegistryConnector {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Headers identifying the caller to the build service
    fn build_target_header(&self) -> BuildResult<HeaderMap> {
        let token = self.config.token.as_deref().ok_or_else(|| {
            BuildError::InvalidConfig("no API token configured, set CRBUILD_TOKEN".to_string())
        })?;

        let mut headers = HeaderMap::new();
        let authorization = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| BuildError::InvalidConfig(format!("Invalid API token: {}", e)))?;
        headers.insert(AUTHORIZATION, authorization);

        if let Some(account) = &self.config.account {
            let value = HeaderValue::from_str(account)
                .map_err(|e| BuildError::InvalidConfig(format!("Invalid account: {}", e)))?;
            headers.insert(HeaderName::from_static(ACCOUNT_HEADER), value);
        }

        Ok(headers)
    }
}

#[async_trait]
impl SessionConnector for RegistryConnector {
    async fn connect(&self, tag: &str) -> BuildResult<(RegistrySession, String)> {
        let reference = ImageReference::parse(tag)?;

        if reference.digest.is_some() {
            return Err(BuildError::InvalidReference(format!(
                "{} (a build target must not include a digest)",
                tag
            )));
        }

        let registry = reference.domain.as_deref().ok_or_else(|| {
            BuildError::InvalidConfig(format!(
                "image name must include a registry host, e.g. us.icr.io/<namespace>/<repository>: {}",
                tag
            ))
        })?;

        let endpoint = self
            .config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}/api/v1/builds", registry));

        tracing::debug!("Registry build endpoint: {}", endpoint);

        let headers = self.build_target_header()?;
        let service = HttpBuildService::with_client(self.client.clone(), endpoint);

        Ok((
            RegistrySession::new(Arc::new(service), headers),
            reference.canonical_name(),
        ))
    }
}

/// Registry build service over HTTP
pub struct HttpBuildService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBuildService {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl BuildService for HttpBuildService {
    async fn image_build(
        &self,
        request: &BuildRequest,
        context: BuildContext,
        headers: &HeaderMap,
        output: &mut BridgeWriter,
    ) -> BuildResult<()> {
        tracing::debug!("POST {} ({:?})", self.endpoint, request);

        let body = reqwest::Body::wrap_stream(ReaderStream::new(context));
        let response = self
            .client
            .post(&self.endpoint)
            .query(request)
            .headers(headers.clone())
            .header(CONTENT_TYPE, "application/x-tar")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BuildError::RemoteStatus {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }

        // レスポンスをそのままパイプへ流す
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            output.write_all(&chunk).await?;
        }
        output.flush().await?;

        Ok(())
    }
}
