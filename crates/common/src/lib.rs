//! Common utilities and shared types for pushlab.
//!
//! This crate provides foundational components used across all pushlab crates:
//!
//! - **Configuration**: Worker settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//!
//! # Example
//!
//! ```no_run
//! use pushlab_common::{AppResult, Config};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     println!("Consuming from {}", config.queue.queue_name);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;

pub use config::{ApnsConfig, Config, DatabaseConfig, LogFormat, LoggingConfig, QueueConfig};
pub use error::{AppError, AppResult};
