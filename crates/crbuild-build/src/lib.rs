//! crbuild remote image build
//!
//! This crate runs `docker build`-style builds on a remote registry build
//! service. A generic build command talks to an image build client; the
//! client implemented here forwards each build to the registry service and
//! streams context upload and build output through an in-process pipe.

pub mod adapter;
pub mod bridge;
pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod invoker;
pub mod options;
pub mod progress;
pub mod reference;
pub mod request;
pub mod session;

pub use adapter::BuildAdapter;
pub use bridge::{BridgeReader, BridgeWriter, stream_bridge};
pub use cli::BuilderCli;
pub use client::{BuildContext, ImageBuildClient, ImageBuildOptions, ImageBuildResponse};
pub use command::{BuildCommand, BuildFlagSet, CommandHost};
pub use config::ConfigFile;
pub use context::ContextBuilder;
pub use error::{BuildError, BuildResult};
pub use invoker::RemoteBuilder;
pub use options::{BuildFlags, BuildOptions, translate_flags};
pub use progress::BuildProgress;
pub use reference::ImageReference;
pub use request::BuildRequest;
pub use session::{
    BuildService, HttpBuildService, RegistryConnector, RegistrySession, SessionConfig,
    SessionConnector,
};
