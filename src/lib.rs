//! Graph Studio Library
//!
//! Core of an administration studio for a graph database: connection
//! session reconciliation, database catalog, schema sync, query pipeline,
//! history and notifications over one observable store.
//! The main binary is in src/main.rs.

pub mod catalog;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod notify;
pub mod query;
pub mod schema;
pub mod servers;
pub mod service;
pub mod session;
pub mod store;
pub mod studio;
pub mod typeql;

pub use studio::Studio;
