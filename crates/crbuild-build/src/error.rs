use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Image name is not in the correct format: {0}")]
    InvalidReference(String),

    #[error("Unable to connect to the registry build service: {0}")]
    Connection(#[source] Box<BuildError>),

    #[error("Build context error, check the supplied context path {path}: {source}")]
    ContextPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to marshal build args as json: {0}")]
    BuildArgs(#[source] serde_json::Error),

    #[error("Remote build service responded with status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("Remote build request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Invalid argument \"{value}\" for \"--{name}\" flag: {message}")]
    InvalidFlag {
        name: String,
        value: String,
        message: String,
    },

    #[error("unknown flag: --{0}")]
    UnknownFlag(String),

    #[error("build requires exactly 1 argument, got {0}")]
    ArgumentCount(usize),

    #[error("Content trust verification is not supported for remote builds")]
    ContentTrust,

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::InvalidReference(tag) => {
                format!(
                    "Image name is not in the correct format: {}\n\
                     \n\
                     Use <registry>/<namespace>/<repository>[:<tag>], for example:\n\
                        us.icr.io/my-namespace/my-app:1.0",
                    tag
                )
            }
            BuildError::DockerfileNotFound(path) => {
                format!(
                    "Dockerfile not found: {}\n\
                     \n\
                     Check the path given with --file, or add a Dockerfile to the build context.",
                    path.display()
                )
            }
            BuildError::Connection(source) => {
                format!(
                    "Unable to connect to the registry build service: {}\n\
                     \n\
                     Check CRBUILD_TOKEN and CRBUILD_ENDPOINT, or the crbuild config file.",
                    source
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
pub type BuildResult<T> = Result<T>;
