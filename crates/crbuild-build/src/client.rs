//! Image build client contract
//!
//! The capability set a build command needs from its backing client. The
//! build command only knows this trait; whether a local daemon or a remote
//! registry service sits behind it is up to the implementation.

use crate::bridge::BridgeReader;
use crate::error::Result;
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use std::collections::HashMap;
use tokio::io::AsyncRead;

/// Build context byte stream (a tar archive, optionally gzip compressed)
pub type BuildContext = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Options of a single image build
#[derive(Debug, Clone, Default)]
pub struct ImageBuildOptions {
    /// Image names to apply to the result
    pub tags: Vec<String>,

    /// Dockerfile path relative to the build context root
    pub dockerfile: String,

    /// Build arguments; `None` values are sent as JSON `null`
    pub build_args: HashMap<String, Option<String>>,

    /// Always attempt to pull a newer version of the base image
    pub pull_parent: bool,

    /// Do not use cache when building the image
    pub no_cache: bool,

    /// Suppress build output
    pub suppress_output: bool,

    /// Registry credentials keyed by registry host
    pub auth_configs: HashMap<String, DockerCredentials>,
}

/// Response of an image build
///
/// The body is a stream of JSON messages as produced by the docker build API.
pub struct ImageBuildResponse {
    pub body: BridgeReader,
}

/// Build client abstraction trait
#[async_trait]
pub trait ImageBuildClient: Send + Sync {
    /// Start an image build and return its output stream
    async fn image_build(
        &self,
        context: BuildContext,
        options: ImageBuildOptions,
    ) -> Result<ImageBuildResponse>;

    /// Host of the daemon backing this client
    fn daemon_host(&self) -> String;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<()>;
}
