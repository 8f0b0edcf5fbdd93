use thiserror::Error;

use crate::command::CommandError;
use crate::fetch::FetchError;
use crate::links::LinkError;
use crate::nft::NftError;
use crate::singbox::apply::ApplyError;
use crate::store::StoreError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid share link: {0}")]
    Link(#[from] LinkError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Nft(#[from] NftError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{command} exited with {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("subscription '{0}' contains no usable tunnels")]
    EmptySubscription(String),

    #[error("failed to read config: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Error::Invalid(err.to_string())
    }
}
