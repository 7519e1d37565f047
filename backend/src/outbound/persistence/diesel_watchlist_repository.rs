//! PostgreSQL-backed `WatchlistRepository` implementation using Diesel ORM.
//!
//! A delta is applied inside one transaction: the watch-list row is locked,
//! removed memberships are deleted batch by batch, added pages are upserted
//! and linked, and the sync timestamps and content hash are stamped last.
//! Any failure rolls the whole delta back.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt as _;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::debug;

use crate::domain::ports::{DeltaCommit, WatchlistRepository, WatchlistRepositoryError};
use crate::domain::{SyncTrigger, WatchEntry, WatchlistRecord};

use super::diesel_helpers::{map_diesel_error, map_pool_error};
use super::models::{MirroredPageRow, NewPageRow, NewWatchlistPageRow, WatchlistRow};
use super::pool::{DbPool, PoolError};
use super::schema::{pages, watchlist_pages, watchlists};

/// Diesel-backed implementation of the `WatchlistRepository` port.
#[derive(Clone)]
pub struct DieselWatchlistRepository {
    pool: DbPool,
}

impl DieselWatchlistRepository {
    /// Create a new repository with the given connection pool.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn pool_error(error: PoolError) -> WatchlistRepositoryError {
    map_pool_error(error, WatchlistRepositoryError::connection)
}

fn diesel_error(error: diesel::result::Error) -> WatchlistRepositoryError {
    map_diesel_error(
        error,
        WatchlistRepositoryError::query,
        WatchlistRepositoryError::connection,
    )
}

fn row_to_record(row: WatchlistRow) -> WatchlistRecord {
    WatchlistRecord {
        id: row.id,
        account_id: row.account_id,
        site: row.site,
        interval: Duration::from_secs(u64::try_from(row.sync_interval_secs).unwrap_or(0)),
        last_synced_at: row.last_synced_at,
        last_manual_sync_at: row.last_manual_sync_at,
        content_hash: row.content_hash,
    }
}

/// Later of a stored timestamp and a new one; timestamps never move back.
fn latest(stored: Option<DateTime<Utc>>, observed: DateTime<Utc>) -> DateTime<Utc> {
    stored.map_or(observed, |stored| stored.max(observed))
}

/// Failure inside the apply transaction.
#[derive(Debug)]
enum ApplyError {
    Diesel(diesel::result::Error),
    NotFound(i64),
}

impl From<diesel::result::Error> for ApplyError {
    fn from(error: diesel::result::Error) -> Self {
        Self::Diesel(error)
    }
}

impl From<ApplyError> for WatchlistRepositoryError {
    fn from(error: ApplyError) -> Self {
        match error {
            ApplyError::Diesel(error) => diesel_error(error),
            ApplyError::NotFound(watchlist_id) => Self::not_found(watchlist_id),
        }
    }
}

async fn apply_in_transaction(
    conn: &mut AsyncPgConnection,
    commit: &DeltaCommit,
) -> Result<(), ApplyError> {
    let watchlist_id = commit.watchlist_id;
    let current: WatchlistRow = watchlists::table
        .find(watchlist_id)
        .select(WatchlistRow::as_select())
        .for_update()
        .first(conn)
        .await
        .optional()?
        .ok_or(ApplyError::NotFound(watchlist_id))?;

    for batch in &commit.plan.removed {
        let ids: Vec<&str> = batch.iter().map(|row| row.id.as_str()).collect();
        diesel::delete(
            watchlist_pages::table
                .filter(watchlist_pages::watchlist_id.eq(watchlist_id))
                .filter(watchlist_pages::page_id.eq_any(ids)),
        )
        .execute(conn)
        .await?;
    }

    for batch in &commit.plan.added {
        let page_rows: Vec<NewPageRow<'_>> = batch
            .iter()
            .map(|row| NewPageRow {
                id: row.id.as_str(),
                site: current.site.as_str(),
                namespace: row.entry.namespace,
                title: row.entry.title.as_str(),
            })
            .collect();
        diesel::insert_into(pages::table)
            .values(&page_rows)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;

        let links: Vec<NewWatchlistPageRow<'_>> = batch
            .iter()
            .map(|row| NewWatchlistPageRow {
                page_id: row.id.as_str(),
                watchlist_id,
            })
            .collect();
        diesel::insert_into(watchlist_pages::table)
            .values(&links)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
    }

    let last_synced_at = latest(current.last_synced_at, commit.synced_at);
    let last_manual_sync_at = match commit.trigger {
        SyncTrigger::Manual => Some(latest(current.last_manual_sync_at, commit.synced_at)),
        SyncTrigger::Scheduled => current.last_manual_sync_at,
    };
    diesel::update(watchlists::table.find(watchlist_id))
        .set((
            watchlists::last_synced_at.eq(Some(last_synced_at)),
            watchlists::last_manual_sync_at.eq(last_manual_sync_at),
            watchlists::content_hash.eq(Some(commit.content_hash.clone())),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl WatchlistRepository for DieselWatchlistRepository {
    async fn list_watchlists(&self) -> Result<Vec<WatchlistRecord>, WatchlistRepositoryError> {
        let mut conn = self.pool.acquire().await.map_err(pool_error)?;

        let rows: Vec<WatchlistRow> = watchlists::table
            .order(watchlists::id.asc())
            .select(WatchlistRow::as_select())
            .load(&mut *conn)
            .await
            .map_err(diesel_error)?;

        Ok(rows.into_iter().map(row_to_record).collect())
    }

    async fn find_watchlist(
        &self,
        watchlist_id: i64,
    ) -> Result<Option<WatchlistRecord>, WatchlistRepositoryError> {
        let mut conn = self.pool.acquire().await.map_err(pool_error)?;

        let row: Option<WatchlistRow> = watchlists::table
            .find(watchlist_id)
            .select(WatchlistRow::as_select())
            .first(&mut *conn)
            .await
            .optional()
            .map_err(diesel_error)?;

        Ok(row.map(row_to_record))
    }

    async fn load_mirror(
        &self,
        watchlist_id: i64,
    ) -> Result<HashSet<WatchEntry>, WatchlistRepositoryError> {
        let mut conn = self.pool.acquire().await.map_err(pool_error)?;

        let rows: Vec<MirroredPageRow> = pages::table
            .inner_join(watchlist_pages::table)
            .filter(watchlist_pages::watchlist_id.eq(watchlist_id))
            .select(MirroredPageRow::as_select())
            .load(&mut *conn)
            .await
            .map_err(diesel_error)?;

        Ok(rows
            .into_iter()
            .map(|row| WatchEntry::new(row.namespace, row.title))
            .collect())
    }

    async fn apply_delta(&self, commit: &DeltaCommit) -> Result<(), WatchlistRepositoryError> {
        let mut conn = self.pool.acquire().await.map_err(pool_error)?;

        let applied: Result<(), ApplyError> = conn
            .transaction(|conn| {
                async move { apply_in_transaction(conn, commit).await }.scope_boxed()
            })
            .await;
        applied?;

        debug!(
            watchlist_id = commit.watchlist_id,
            statements = commit.plan.statement_count(),
            "watch-list delta committed"
        );
        Ok(())
    }
}
