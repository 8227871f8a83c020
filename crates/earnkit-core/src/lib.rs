//! Core domain logic and persistence for multi-protocol yield earning.
//!
//! This crate provides:
//! - Pool, position and target types (`types` module)
//! - Slug and store-key derivation (`slug` module)
//! - Step plans and their invariants (`steps` module)
//! - Join/exit request and result types (`actions` module)
//! - The join-process state machine (`process` module)
//! - Rate and amount arithmetic (`rates` module)
//! - Typed errors and validation issues (`error` module)
//!
//! With the `persistence` feature enabled:
//! - SQLite cache for pools and positions (`db` module)

pub mod actions;
pub mod error;
pub mod process;
pub mod rates;
pub mod slug;
pub mod steps;
pub mod types;

#[cfg(feature = "persistence")]
pub mod db;

// Re-export commonly used items from core modules
pub use actions::*;
pub use error::*;
pub use process::*;
pub use slug::{derive_pool_slug, parse_pool_slug, parse_position_key, position_key};
pub use steps::*;
pub use types::*;

#[cfg(feature = "persistence")]
pub use db::{DbError, EarningDb};
