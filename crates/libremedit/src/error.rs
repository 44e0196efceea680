use thiserror::Error;

use crate::host::HostError;

#[derive(Error, Debug)]
pub enum RemoteFileError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command failed: {0}")]
    Command(#[from] HostError),

    #[error("no content returned for remote file {0}")]
    EmptyContent(String),

    #[error("{0} has no location in the cache")]
    CachePath(String),

    #[error("event is missing the file path argument")]
    MissingPathArgument,

    #[error("event content for {0} is not a byte payload")]
    UnreadableContent(String),
}
