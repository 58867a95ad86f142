//! Error types for cordon-core

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CordonError {
    #[error("failed to spawn enforcement binary {}: {source}", enforcer.display())]
    Spawn {
        enforcer: PathBuf,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
