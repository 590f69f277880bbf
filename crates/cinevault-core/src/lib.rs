//! Cinevault Core Library
//!
//! This crate provides the domain models, chunk planning, configuration, and
//! error types shared by the Cinevault upload engine. It performs no I/O;
//! storage backends live in `cinevault-storage` and the transfer engine in
//! `cinevault-uploader`.

pub mod config;
pub mod error;
pub mod models;
pub mod planner;

// Re-export commonly used types
pub use config::UploaderConfig;
pub use error::UploadError;
pub use models::progress::{ProgressSnapshot, UploadCompleted};
pub use models::session::{ByteRange, PartState, PartStatus, SessionStatus, UploadSession};
pub use planner::{ChunkPlanner, PartPlan, PlanError};
