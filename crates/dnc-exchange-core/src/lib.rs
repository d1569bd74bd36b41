//! DNC Exchange core: the compliance-check hot path, the provider sync
//! engine, and the admin write path, as a single in-process library.
//!
//! This crate is deliberately collaborator-agnostic (spec.md §1): it never
//! opens a socket, a database connection, or a queue itself. Every
//! out-of-process concern — persistence, caching, provider transport,
//! auditing, eventing — is an `async_trait` boundary a host binary wires to
//! a concrete backend. `domain`/`model` hold no state; `store`/`cache`/
//! `provider`/`audit` define the boundaries; `circuit_breaker`/`resolver`/
//! `evaluator`/`risk` are the pure decision logic; `orchestrator`/`sync`/
//! `admin` compose all of the above into the three operations a host binds
//! to its own surface (HTTP, gRPC, a CLI, ...).

pub mod admin;
pub mod audit;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod domain;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod resolver;
pub mod risk;
pub mod store;
pub mod sync;

pub use admin::AdminOperations;
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use orchestrator::CheckOrchestrator;
pub use sync::SyncEngine;

#[cfg(test)]
mod tests;
