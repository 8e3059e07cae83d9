use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use game_core::dictionary::{DictionaryService, MemoryDictionary};
use game_persistence::NullSink;
use game_server::{
    config::Config,
    create_routes,
    dispatcher::EventDispatcher,
    engine::{GameEngine, spawn_timer_event_loop},
    kv::{KvStore, MemoryKv, RedisKv},
    metrics::EngineMetrics,
    store::{GameStore, KvWordCache},
    timer::TimerService,
    websocket::ConnectionManager,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting word-chain game server...");

    let config = Config::new();

    // Shared state store: Redis when configured, otherwise in-memory.
    let kv: Arc<dyn KvStore> = match &config.redis_url {
        Some(url) => match RedisKv::connect(url).await {
            Ok(redis) => Arc::new(redis),
            Err(e) => {
                tracing::error!("Failed to connect to redis at {}: {}", url, e);
                std::process::exit(1);
            }
        },
        None => {
            warn!("REDIS_URL not set, using the in-memory store (single-process only)");
            Arc::new(MemoryKv::new())
        }
    };
    if let Err(e) = kv.health_check().await {
        tracing::error!("KV store health check failed: {}", e);
        std::process::exit(1);
    }
    let store = Arc::new(GameStore::new(kv.clone()));

    // Dictionary: file-backed when configured, embedded seed otherwise.
    let dictionary_store = match &config.dictionary_file {
        Some(path) => {
            let table = match std::fs::read_to_string(path) {
                Ok(table) => table,
                Err(e) => {
                    tracing::error!("Failed to read dictionary file '{}': {}", path, e);
                    std::process::exit(1);
                }
            };
            match MemoryDictionary::from_tsv(&table) {
                Ok(dict) => {
                    info!("Loaded {} dictionary entries from {}", dict.len(), path);
                    dict
                }
                Err(e) => {
                    tracing::error!("Failed to parse dictionary file '{}': {}", path, e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            let dict = MemoryDictionary::seed();
            info!("Using the embedded seed dictionary ({} entries)", dict.len());
            dict
        }
    };
    let dictionary = Arc::new(DictionaryService::new(
        Arc::new(dictionary_store),
        Arc::new(KvWordCache::new(kv.clone())),
    ));
    if let Err(e) = dictionary.preload(config.preload_words).await {
        warn!("Dictionary preload failed: {}", e);
    }

    let (timers, timer_events) = TimerService::new();
    let connections = Arc::new(ConnectionManager::new());
    let dispatcher = Arc::new(EventDispatcher::new(connections.clone()));
    let metrics = Arc::new(EngineMetrics::new());

    let engine = Arc::new(GameEngine::new(
        store.clone(),
        dictionary,
        timers,
        dispatcher,
        Arc::new(NullSink),
        metrics,
    ));
    spawn_timer_event_loop(engine.clone(), timer_events);

    let routes = create_routes(connections.clone(), engine.clone());

    // Periodic housekeeping: stale sessions out, metrics snapshot in the log.
    {
        let connections = connections.clone();
        let engine = engine.clone();
        let connection_timeout = Duration::from_secs(config.connection_timeout_seconds);
        let metrics_interval = Duration::from_secs(config.metrics_interval_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(metrics_interval);
            loop {
                interval.tick().await;
                connections
                    .cleanup_inactive_sessions(connection_timeout)
                    .await;
                engine
                    .metrics()
                    .log_snapshot(engine.store().conflict_retries());
            }
        });
    }

    info!("Server starting on {}:{}", config.host, config.port);

    let addr = (
        config.host.parse::<std::net::IpAddr>().expect("Invalid HOST"),
        config.port,
    );

    let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        // Wait for SIGINT (Ctrl+C) or SIGTERM
        #[cfg(unix)]
        {
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
                .expect("Failed to install SIGINT handler");
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");

            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully...");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await.expect("Failed to listen for ctrl+c");
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    });

    info!("Server started successfully on {}. Press Ctrl+C to stop.", addr);
    server.await;
    info!("Server shutdown complete.");
}
