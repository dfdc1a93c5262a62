//! # Recruitment Server
//!
//! Wires the recruitment engine into one process: the happenings stream and
//! the new-nations poller fill the per-channel queues, the HTTP surface
//! serves them, and a monitor prunes and reports. Every task shares one
//! cancellation token that is fired on Ctrl-C or SIGTERM.
//!
//! Without `DATABASE_URL` all state lives in memory and is lost on exit.

use std::sync::Arc;

use anyhow::{Context, Result};
use lib_recruit::connections::{MemoryStore, PgStore, RecruiterStore, WhitelistStore};
use lib_recruit::retrieve::NsClientConfig;
use lib_recruit::{
    CooldownPolicy, HappeningsConfig, HappeningsIngestor, NewNationsPoller, NsClient, QueueManager, RecruitmentDesk,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod recruit_logic;
use recruit_logic::config::{self, Settings};
use recruit_logic::{downstream, logger, monitor, state};

fn split_store<S>(store: Arc<S>) -> (Arc<dyn WhitelistStore>, Arc<dyn RecruiterStore>)
where
    S: WhitelistStore + RecruiterStore + 'static,
{
    (store.clone(), store)
}

async fn open_stores(settings: &Settings) -> Result<(Arc<dyn WhitelistStore>, Arc<dyn RecruiterStore>)> {
    match &settings.database_url {
        Some(url) => {
            let store = PgStore::connect(url)?;
            store.ping().await.context("Database is unreachable")?;
            store.migrate().await?;
            log::info!("Using PostgreSQL storage.");
            Ok(split_store(Arc::new(store)))
        }
        None => {
            log::warn!("No DATABASE_URL configured; channels and recruiters are kept in memory only.");
            Ok(split_store(Arc::new(MemoryStore::new())))
        }
    }
}

async fn wait_for_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = config::load_config().resolve()?;
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    log::info!("Starting recruitment server as {}", settings.operator);

    let (whitelists, recruiters) = open_stores(&settings).await?;

    let queues = Arc::new(QueueManager::new(whitelists).with_retention(settings.queue_retention));
    queues.load().await?;
    queues.seed_global_whitelist(&settings.home_regions);

    let mut client_config = NsClientConfig::new(settings.api_url.clone(), &settings.operator);
    client_config.period_max = settings.period_max;
    let client = Arc::new(NsClient::new(client_config)?);

    let desk = Arc::new(RecruitmentDesk::new(
        Arc::clone(&queues),
        recruiters,
        Arc::clone(&client),
        CooldownPolicy::default(),
    ));

    let mut stream_config = HappeningsConfig::new(settings.happenings_url.clone(), &settings.operator);
    stream_config.base_backoff = settings.reconnect_base_delay;
    stream_config.max_backoff = settings.reconnect_max_delay;
    stream_config.idle_timeout = settings.idle_timeout;
    let ingestor = Arc::new(HappeningsIngestor::new(stream_config, Arc::clone(&queues))?);

    let poller = Arc::new(
        NewNationsPoller::new(Arc::clone(&client), Arc::clone(&queues), settings.polling_rate)
            .with_retry_delay(settings.poll_retry),
    );

    let app_state = state::AppState::new(Arc::clone(&queues), desk, client, ingestor.state_handle());
    let shutdown = CancellationToken::new();

    let ingestor_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { ingestor.run(shutdown).await }
    });
    let poller_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { poller.run(shutdown).await }
    });
    let monitor_handle = tokio::spawn(monitor::run(
        settings.monitor_interval,
        app_state.clone(),
        shutdown.clone(),
    ));
    // a server that cannot bind takes the whole process down
    let port = settings.port;
    let downstream_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let res = downstream::run(port, app_state, shutdown.clone()).await;
            if res.is_err() {
                shutdown.cancel();
            }
            res
        }
    });

    tokio::select! {
        _ = wait_for_signal() => {}
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();

    let (ingestor_res, poller_res, monitor_res, downstream_res) =
        tokio::join!(ingestor_handle, poller_handle, monitor_handle, downstream_handle);
    for res in [ingestor_res, poller_res, monitor_res] {
        if let Err(e) = res {
            log::error!("Task ended abnormally: {}", e);
        }
    }
    match downstream_res {
        Ok(Err(e)) => log::error!("HTTP server failed: {}", e),
        Err(e) => log::error!("HTTP server task ended abnormally: {}", e),
        Ok(Ok(())) => {}
    }

    log::info!("Shutdown complete.");
    Ok(())
}
