//! Backend entry-point: wires storage, the outbound queues and the scheduled
//! watch-list sync, then runs until interrupted.

use std::sync::Arc;

use color_eyre::eyre::{Context, Result, eyre};
use futures_util::FutureExt;
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use watchlist_backend::domain::TokenService;
use watchlist_backend::domain::periodic_clock::{PeriodicClock, TickCallback};
use watchlist_backend::domain::request_queue::{OutboundQueues, RateLimiter};
use watchlist_backend::domain::runtime::TokioSleeper;
use watchlist_backend::domain::watchlist_sync::{WatchlistSyncPorts, WatchlistSynchronizer};
use watchlist_backend::outbound::mediawiki::{
    MediaWikiWatchlistSource, OAuthClient, OAuthTokenRefresher, ReqwestExecutor, SiteMatrix,
};
use watchlist_backend::outbound::notify::TracingDeltaNotifier;
use watchlist_backend::outbound::persistence::{
    DbPool, DieselAccountTokenStore, DieselWatchlistRepository, PgConnectionFactory,
    run_migrations,
};
use watchlist_backend::settings::SyncSettings;

/// Application bootstrap.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings =
        SyncSettings::load().map_err(|error| eyre!("failed to load configuration: {error}"))?;
    let required = settings.validate()?;

    run_migrations(&required.database_url)
        .await
        .wrap_err("failed to migrate the database")?;

    let pool = DbPool::new(
        PgConnectionFactory::new(required.database_url.as_str()),
        settings.pool_config(),
    );
    drop(
        pool.acquire()
            .await
            .wrap_err("storage connection unavailable at startup")?,
    );

    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let (window, max_calls) = settings.rate_limit();
    let limiter = Arc::new(RateLimiter::new(
        window,
        max_calls,
        clock.clone(),
        Arc::new(TokioSleeper),
    ));
    let executor = Arc::new(
        ReqwestExecutor::new(settings.http_timeout()).wrap_err("failed to build HTTP client")?,
    );
    let queues = OutboundQueues::new(executor, limiter, settings.queue_config());

    let sites = Arc::new(SiteMatrix::new(
        required.meta_api_url.clone(),
        queues.foreground.clone(),
    ));
    let source = Arc::new(MediaWikiWatchlistSource::new(queues.clone(), sites));
    let refresher = Arc::new(
        OAuthTokenRefresher::new(
            required.oauth_token_url.clone(),
            OAuthClient {
                client_id: required.oauth_client_id.clone(),
                client_secret: required.oauth_client_secret.clone(),
            },
            settings.http_timeout(),
            clock.clone(),
        )
        .wrap_err("failed to build OAuth client")?,
    );
    let tokens = Arc::new(TokenService::new(
        Arc::new(DieselAccountTokenStore::new(pool.clone())),
        refresher,
        clock.clone(),
    ));
    let repository = Arc::new(DieselWatchlistRepository::new(pool.clone()));
    let synchronizer = Arc::new(WatchlistSynchronizer::new(
        WatchlistSyncPorts::new(repository, source, tokens, Arc::new(TracingDeltaNotifier)),
        clock,
    ));

    let tick: TickCallback = {
        let scheduled = synchronizer.clone();
        Arc::new(move || {
            let pass = scheduled.clone();
            async move { run_scheduled_pass(&pass).await }.boxed()
        })
    };
    let schedule = PeriodicClock::new(tick, settings.tick_interval(), true, false);
    info!(
        tick_secs = settings.tick_interval().as_secs(),
        pool_size = settings.pool_config().size(),
        "watch-list sync started"
    );

    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    schedule.stop();
    queues.pause_all();
    pool.close_all();
    info!("watch-list sync stopped");
    Ok(())
}

async fn run_scheduled_pass(synchronizer: &WatchlistSynchronizer) {
    match synchronizer.update_all().await {
        Ok(report) => info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            "scheduled sync pass finished"
        ),
        Err(error) => warn!(%error, "scheduled sync pass failed"),
    }
}
