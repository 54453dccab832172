//! Orchestration of the chainvault ingestion tasks.
//!
//! [`IndexerService`] wires the engine components together and runs the live
//! watcher, the backfill scanner and the balance sweeper as independent
//! [`IndexerActor`]s until shutdown is requested.

mod actors;
pub use actors::IndexerActor;

mod error;
pub use error::ServiceError;

mod service;
pub use service::IndexerService;
