//! # cordon-core
//!
//! Builder and launcher for sandboxed command execution through the
//! cordon enforcement binary.
//!
//! This crate does not isolate anything itself. It translates a
//! declarative [`SandboxSpec`] into the argument vector the enforcement
//! binary understands, and wraps the resulting child process so it can be
//! awaited or cancelled without leaking OS resources:
//! - [`SandboxSpec`] - accumulating description of one sandbox instance
//!   (exposed files, mounted directories, environment, resource limits)
//! - [`Launcher`] - binds a spec to the enforcement binary's location and
//!   produces ready-to-spawn commands, with or without a cancellation token

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod launcher;
pub mod spec;

pub use error::CordonError;
pub use launcher::{CancellableChild, CancellableCommand, Launcher};
pub use spec::{DirMapping, FileMapping, SandboxSpec};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, CordonError>;
