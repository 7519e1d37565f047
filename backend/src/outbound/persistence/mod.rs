//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! This module provides concrete implementations of the watch-list and token
//! ports backed by PostgreSQL through `diesel-async`, plus the connection
//! pool they share.
//!
//! # Architecture
//!
//! - **Thin adapters**: repositories only translate between Diesel rows and
//!   domain types. Diffing and batching stay in the domain.
//! - **Internal models**: row structs (`models.rs`) and table definitions
//!   (`schema.rs`) never leave this module.
//! - **Self-expiring pool**: a fixed number of slots whose idle connections
//!   close after a timeout, see [`ConnectionPool`].
//! - **Strongly typed errors**: database errors map to port error types with
//!   stable messages.
//!
//! # Example
//!
//! ```no_run
//! use watchlist_backend::outbound::persistence::{
//!     DbPool, DieselWatchlistRepository, PgConnectionFactory, PoolConfig,
//! };
//!
//! # async fn build() {
//! let pool = DbPool::new(
//!     PgConnectionFactory::new("postgres://localhost/watchlists"),
//!     PoolConfig::default(),
//! );
//! let repository = DieselWatchlistRepository::new(pool);
//! # }
//! ```

mod diesel_account_token_store;
pub(crate) mod diesel_helpers;
mod diesel_watchlist_repository;
mod migrations;
mod models;
mod pool;
mod schema;

pub use diesel_account_token_store::DieselAccountTokenStore;
pub use diesel_watchlist_repository::DieselWatchlistRepository;
pub use migrations::{MigrationError, run_migrations};
pub use pool::{
    ConnectionFactory, ConnectionPool, DbPool, PgConnectionFactory, PoolConfig, PoolError,
    PoolStats, PooledConnection,
};
