//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match `migrations/` exactly. Regenerate with
//! `diesel print-schema` after changing a migration.

diesel::table! {
    /// OAuth tokens per remote account.
    accounts (id) {
        /// Remote (central) account id.
        id -> Int8,
        access_token -> Text,
        refresh_token -> Text,
        token_expires_at -> Timestamptz,
        token_issued_at -> Timestamptz,
    }
}

diesel::table! {
    /// One mirrored watch-list per account and site.
    watchlists (id) {
        id -> Int8,
        account_id -> Int8,
        /// Site database name, e.g. `enwiki`.
        site -> Varchar,
        /// Minimum seconds between scheduled syncs.
        sync_interval_secs -> Int4,
        last_synced_at -> Nullable<Timestamptz>,
        last_manual_sync_at -> Nullable<Timestamptz>,
        /// SHA-256 of the last mirrored entry list.
        content_hash -> Nullable<Bytea>,
    }
}

diesel::table! {
    /// Pages shared by every watch-list on a site. Never deleted by sync.
    pages (id) {
        /// Hex SHA-256 of `site:namespace:title`.
        id -> Varchar,
        site -> Varchar,
        namespace -> Int4,
        title -> Text,
    }
}

diesel::table! {
    /// Membership of pages in watch-lists.
    watchlist_pages (id) {
        id -> Int8,
        page_id -> Varchar,
        watchlist_id -> Int8,
    }
}

diesel::joinable!(watchlists -> accounts (account_id));
diesel::joinable!(watchlist_pages -> pages (page_id));
diesel::joinable!(watchlist_pages -> watchlists (watchlist_id));

diesel::allow_tables_to_appear_in_same_query!(accounts, pages, watchlist_pages, watchlists);
