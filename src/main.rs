use std::{net::SocketAddr, process, sync::Arc, time::Duration};

use poststat::{
    application::{
        error::AppError,
        events::{EventPublisher, MessageHandler},
        jobs::{AnalysisProcessor, OutboxRelay},
        posts::PostService,
        repos::{HealthRepo, OutboxRepo, PostStatsRepo, PostsRepo, PostsWriteRepo},
    },
    cache::{CachePolicy, CacheStore, MemoryCacheStore, PopularityCache},
    config::{self, CacheBackend, CacheSettings},
    infra::{
        broker::{KafkaPublisher, KafkaSubscriber},
        db::PostgresRepositories,
        error::InfraError,
        http::{self, ApiRateLimiter, ApiState},
        redis::RedisCacheStore,
        telemetry,
    },
};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Relay(_) => run_relay(settings).await,
    }
}

struct ApplicationContext {
    api_state: ApiState,
    relay: OutboxRelay,
    analysis: Arc<AnalysisProcessor>,
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let publisher = connect_publisher(&settings).await?;
    let cache_store = build_cache_store(&settings.cache).await?;
    let app = build_application_context(repositories, cache_store, publisher.clone(), &settings);

    let relay_handle = settings
        .outbox
        .relay_enabled
        .then(|| spawn_outbox_relay(app.relay.clone(), settings.outbox.poll_interval));

    let consumer = if settings.broker.consumer_enabled {
        spawn_subscriber(&settings, app.analysis.clone())
    } else {
        info!(
            target = "poststat::main",
            "analysis consumer disabled; run with broker.consumer_enabled=true to process events"
        );
        None
    };

    let result = serve_http(&settings, app.api_state).await;

    if let Some((subscriber, handle)) = consumer {
        subscriber.shutdown();
        await_or_abort(handle, settings.server.graceful_shutdown, "consumer").await;
    }

    if let Some(handle) = relay_handle {
        handle.abort();
        let _ = handle.await;
    }

    let state = publisher.shutdown().await;
    info!(target = "poststat::main", producer = state.as_str(), "shutdown complete");

    result
}

async fn run_relay(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let publisher = connect_publisher(&settings).await?;

    let outbox: Arc<dyn OutboxRepo> = repositories;
    let sender: Arc<dyn EventPublisher> = publisher.clone();
    let relay = OutboxRelay::new(outbox, sender, settings.outbox.batch_size.get());

    let drained = relay.drain().await;
    publisher.shutdown().await;

    let published =
        drained.map_err(|err| AppError::unexpected(format!("outbox relay failed: {err}")))?;
    info!(target = "poststat::main", published, "relay finished");
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| AppError::validation("database.url must be configured"))?;

    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.acquire_timeout,
    )
    .await
    .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(
        pool,
        settings.database.max_hold,
    )))
}

async fn connect_publisher(settings: &config::Settings) -> Result<Arc<KafkaPublisher>, AppError> {
    let publisher = KafkaPublisher::new(&settings.broker)
        .map_err(|err| AppError::from(InfraError::broker(err.to_string())))?;

    match publisher.start().await {
        Ok(state) => info!(
            target = "poststat::main",
            state = state.as_str(),
            topic = publisher.default_topic().unwrap_or(""),
            "producer ready"
        ),
        Err(err) => warn!(
            target = "poststat::main",
            error = %err,
            "producer not connected; analysis events stay in the outbox until the broker is reachable"
        ),
    }

    Ok(Arc::new(publisher))
}

async fn build_cache_store(settings: &CacheSettings) -> Result<Arc<dyn CacheStore>, AppError> {
    let store: Arc<dyn CacheStore> = match settings.backend {
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new(settings.memory_capacity)),
        CacheBackend::Redis if !settings.cluster_nodes.is_empty() => Arc::new(
            RedisCacheStore::connect_cluster(&settings.cluster_nodes)
                .await
                .map_err(|err| AppError::from(InfraError::cache(err.to_string())))?,
        ),
        CacheBackend::Redis => Arc::new(
            RedisCacheStore::connect(&settings.redis_url())
                .await
                .map_err(|err| AppError::from(InfraError::cache(err.to_string())))?,
        ),
    };
    Ok(store)
}

fn build_application_context(
    repositories: Arc<PostgresRepositories>,
    cache_store: Arc<dyn CacheStore>,
    publisher: Arc<KafkaPublisher>,
    settings: &config::Settings,
) -> ApplicationContext {
    let posts_repo: Arc<dyn PostsRepo> = repositories.clone();
    let posts_write_repo: Arc<dyn PostsWriteRepo> = repositories.clone();
    let stats_repo: Arc<dyn PostStatsRepo> = repositories.clone();
    let outbox_repo: Arc<dyn OutboxRepo> = repositories.clone();
    let health_repo: Arc<dyn HealthRepo> = repositories;
    let event_publisher: Arc<dyn EventPublisher> = publisher;

    let stats_cache = PopularityCache::new(
        cache_store,
        stats_repo.clone(),
        CachePolicy::from(&settings.cache),
    );

    let posts = Arc::new(PostService::new(
        posts_repo,
        posts_write_repo,
        outbox_repo.clone(),
        event_publisher.clone(),
    ));
    let analysis = Arc::new(AnalysisProcessor::new(stats_repo, stats_cache.clone()));
    let relay = OutboxRelay::new(
        outbox_repo,
        event_publisher,
        settings.outbox.batch_size.get(),
    );

    let rate_limiter = Arc::new(ApiRateLimiter::new(
        Duration::from_secs(u64::from(settings.rate_limit.window_seconds.get())),
        settings.rate_limit.max_requests.get(),
    ));

    ApplicationContext {
        api_state: ApiState {
            posts,
            stats: stats_cache,
            health: health_repo,
            rate_limiter,
        },
        relay,
        analysis,
    }
}

fn spawn_outbox_relay(relay: OutboxRelay, poll_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match relay.relay_once().await {
                Ok(0) => {}
                Ok(published) => info!(
                    target = "poststat::main::outbox",
                    published, "relayed pending analysis events"
                ),
                Err(err) => warn!(
                    target = "poststat::main::outbox",
                    error = %err,
                    "outbox relay attempt failed; retrying next tick"
                ),
            }
        }
    })
}

fn spawn_subscriber(
    settings: &config::Settings,
    analysis: Arc<AnalysisProcessor>,
) -> Option<(Arc<KafkaSubscriber>, JoinHandle<()>)> {
    let subscriber = match KafkaSubscriber::new(&settings.broker) {
        Ok(subscriber) => Arc::new(subscriber),
        Err(err) => {
            error!(
                target = "poststat::main",
                error = %err,
                "failed to create consumer; analysis pipeline idle"
            );
            return None;
        }
    };

    let handler: Arc<dyn MessageHandler> = analysis;
    let running = subscriber.clone();
    let handle = tokio::spawn(async move {
        if let Err(err) = running.run(handler).await {
            error!(
                target = "poststat::main",
                error = %err,
                "consumer stopped; analysis pipeline idle"
            );
        }
    });

    Some((subscriber, handle))
}

async fn await_or_abort(handle: JoinHandle<()>, grace: Duration, task: &'static str) {
    let abort = handle.abort_handle();
    if tokio::time::timeout(grace, handle).await.is_err() {
        warn!(target = "poststat::main", task, "task did not stop in time; aborting");
        abort.abort();
    }
}

async fn serve_http(settings: &config::Settings, api_state: ApiState) -> Result<(), AppError> {
    let router = http::build_router(api_state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "poststat::main",
        addr = %settings.server.addr,
        "http listener bound"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "poststat::main", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(target = "poststat::main", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(target = "poststat::main", "shutdown signal received");
}
