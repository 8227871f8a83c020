//! Orchestration service for multi-protocol yield earning.
//!
//! This crate provides:
//! - Keyed reactive stores with debounced, persisted flushes (`store`
//!   module)
//! - The handler registry over the static chain table (`registry`
//!   module)
//! - Event-bus integration and debounced reloads (`events` module)
//! - The `EarningService` facade: subscription fan-out, join/exit
//!   pipelines, process records and target caching (`service` module)
//! - In-memory collaborators for tests (`testing` module)

pub mod events;
pub mod registry;
pub mod service;
pub mod store;
pub mod testing;

pub use events::{BusEvent, TransactionKind};
pub use registry::HandlerRegistry;
pub use service::{
    AccountProvider, AggregateSubscription, EarningService, JoinValidation, ServiceConfig,
    default_db_path,
};
pub use store::{KeyedStore, StoreConfig, StoreItem, StoreSink};
