//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! This module follows the hexagonal architecture pattern, providing concrete
//! implementations of domain port traits:
//!
//! - **persistence**: PostgreSQL repositories and the connection pool
//! - **mediawiki**: action API executor, watch-list source and OAuth refresh
//! - **notify**: delta notifier writing structured log events
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod mediawiki;
pub mod notify;
pub mod persistence;
