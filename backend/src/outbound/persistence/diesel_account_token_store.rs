//! PostgreSQL-backed `AccountTokenStore` implementation using Diesel ORM.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use diesel_async::scoped_futures::ScopedFutureExt as _;

use crate::domain::AccessToken;
use crate::domain::ports::{AccountTokenStore, AccountTokenStoreError};

use super::diesel_helpers::{map_diesel_error, map_pool_error};
use super::models::AccountRow;
use super::pool::{DbPool, PoolError};
use super::schema::accounts;

/// Diesel-backed implementation of the `AccountTokenStore` port.
#[derive(Clone)]
pub struct DieselAccountTokenStore {
    pool: DbPool,
}

impl DieselAccountTokenStore {
    /// Create a new store with the given connection pool.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl From<PoolError> for AccountTokenStoreError {
    fn from(error: PoolError) -> Self {
        map_pool_error(error, Self::connection)
    }
}

fn diesel_error(error: diesel::result::Error) -> AccountTokenStoreError {
    map_diesel_error(
        error,
        AccountTokenStoreError::query,
        AccountTokenStoreError::connection,
    )
}

fn row_to_token(row: AccountRow) -> AccessToken {
    AccessToken {
        access_token: row.access_token,
        refresh_token: row.refresh_token,
        expires_at: row.token_expires_at,
        issued_at: row.token_issued_at,
    }
}

fn token_to_row(account_id: i64, token: &AccessToken) -> AccountRow {
    AccountRow {
        id: account_id,
        access_token: token.access_token.clone(),
        refresh_token: token.refresh_token.clone(),
        token_expires_at: token.expires_at,
        token_issued_at: token.issued_at,
    }
}

#[async_trait]
impl AccountTokenStore for DieselAccountTokenStore {
    async fn load(&self, account_id: i64) -> Result<AccessToken, AccountTokenStoreError> {
        let row = self
            .pool
            .use_connection(|conn| {
                async move {
                    accounts::table
                        .find(account_id)
                        .select(AccountRow::as_select())
                        .first(conn)
                        .await
                        .optional()
                        .map_err(diesel_error)
                }
                .scope_boxed()
            })
            .await?;

        row.map(row_to_token)
            .ok_or_else(|| AccountTokenStoreError::missing_account(account_id))
    }

    async fn save(
        &self,
        account_id: i64,
        token: &AccessToken,
    ) -> Result<(), AccountTokenStoreError> {
        let row = token_to_row(account_id, token);
        self.pool
            .use_connection(|conn| {
                async move {
                    diesel::insert_into(accounts::table)
                        .values(&row)
                        .on_conflict(accounts::id)
                        .do_update()
                        .set((
                            accounts::access_token.eq(excluded(accounts::access_token)),
                            accounts::refresh_token.eq(excluded(accounts::refresh_token)),
                            accounts::token_expires_at.eq(excluded(accounts::token_expires_at)),
                            accounts::token_issued_at.eq(excluded(accounts::token_issued_at)),
                        ))
                        .execute(conn)
                        .await
                        .map(|_| ())
                        .map_err(diesel_error)
                }
                .scope_boxed()
            })
            .await
    }
}
