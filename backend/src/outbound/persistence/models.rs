//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::schema::{accounts, pages, watchlist_pages, watchlists};

/// Row struct for reading from the watchlists table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = watchlists)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct WatchlistRow {
    pub id: i64,
    pub account_id: i64,
    pub site: String,
    pub sync_interval_secs: i32,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_manual_sync_at: Option<DateTime<Utc>>,
    pub content_hash: Option<Vec<u8>>,
}

/// Projection of a mirrored entry joined through `watchlist_pages`.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = pages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct MirroredPageRow {
    pub namespace: i32,
    pub title: String,
}

/// Insertable page row.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = pages)]
pub(crate) struct NewPageRow<'a> {
    pub id: &'a str,
    pub site: &'a str,
    pub namespace: i32,
    pub title: &'a str,
}

/// Insertable membership row.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = watchlist_pages)]
pub(crate) struct NewWatchlistPageRow<'a> {
    pub page_id: &'a str,
    pub watchlist_id: i64,
}

/// Row struct for reading and upserting account tokens.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct AccountRow {
    pub id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub token_issued_at: DateTime<Utc>,
}
