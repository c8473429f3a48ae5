//! Protobuf build management: dependency vendoring and protoc orchestration.
//!
//! The library resolves proto dependencies from Go module caches, git,
//! HTTP archives, S3, GCS and local paths into a content-addressed cache,
//! syncs their `.proto` files into a vendor directory, and compiles the
//! project's proto tree directory by directory with per-directory plugin
//! configuration. It also runs as a protoc plugin itself, bridging wrapper
//! plugins defined as shell commands or Docker containers.

pub mod bridge;
pub mod config;
pub mod error;
pub mod protoc;
pub mod resolver;
pub mod shell;
pub mod vendor;
pub mod walker;

pub use config::Config;
pub use error::{Error, Result};
