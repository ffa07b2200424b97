// Storage backends for existence probing and file operations under the storage root.

pub mod local;
pub mod memory;
pub mod traits;
pub mod upload;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("'{0}' is a directory")]
    IsDirectory(String),

    #[error("the form file '{0}' is required")]
    MissingFile(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
