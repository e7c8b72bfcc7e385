use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("backup root is locked by another process: {}", .0.display())]
    Locked(PathBuf),

    #[error("game is running; refusing to touch the live save")]
    GameActive,

    #[error("slot not found: {}", .0.display())]
    SlotNotFound(PathBuf),

    /// A previous restore left its temporary copy of the live save behind.
    #[error("leftover restore directory must be inspected first: {}", .0.display())]
    StaleTemp(PathBuf),

    #[error("leftover placeholder slot must be inspected first: {}", .0.display())]
    PlaceholderExists(PathBuf),

    #[error("tree copy failed with code {code}")]
    CopyFailed {
        code: i32,
        /// Directory that still holds the last known good live save, if any.
        preserved: Option<PathBuf>,
    },
}
