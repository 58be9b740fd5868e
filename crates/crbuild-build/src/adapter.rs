//! Build client backed by the registry build service

use crate::client::{BuildContext, ImageBuildClient, ImageBuildOptions, ImageBuildResponse};
use crate::error::Result;
use crate::invoker::RemoteBuilder;
use crate::session::RegistrySession;
use async_trait::async_trait;

/// [`ImageBuildClient`] implementation that runs builds remotely
///
/// Only `image_build` does real work. The remaining capabilities answer
/// trivially because no local daemon exists.
pub struct BuildAdapter {
    builder: RemoteBuilder,
}

impl BuildAdapter {
    pub fn new(session: RegistrySession) -> Self {
        Self {
            builder: RemoteBuilder::new(session),
        }
    }
}

#[async_trait]
impl ImageBuildClient for BuildAdapter {
    async fn image_build(
        &self,
        context: BuildContext,
        options: ImageBuildOptions,
    ) -> Result<ImageBuildResponse> {
        self.builder.image_build(context, &options)
    }

    fn daemon_host(&self) -> String {
        self.builder.daemon_host()
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
