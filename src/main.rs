use std::{future::IntoFuture, process, sync::Arc};

use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use url::Url;
use waystation::{
    config::{self, ClassifyArgs, Settings, StorageBackend},
    engine::{
        CacheStorage, Engine, EngineDeps, FetchRequest, MemoryStorage, Method, NamespaceRegistry,
        Network, RequestClassifier, RequestDestination,
    },
    error::AppError,
    infra::{
        error::InfraError, fs_store::FsCacheStorage, http, network::ReqwestNetwork,
        sessions::SessionHub, telemetry,
    },
};

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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Classify(args) => run_classify(&settings, &args),
        config::Command::Namespaces => run_namespaces(&settings).await,
    }
}

fn build_storage(settings: &Settings) -> Result<Arc<dyn CacheStorage>, AppError> {
    let storage: Arc<dyn CacheStorage> = match settings.storage.backend {
        StorageBackend::Memory => match settings.storage.max_entries {
            Some(limit) => Arc::new(MemoryStorage::with_max_entries(limit)),
            None => Arc::new(MemoryStorage::new()),
        },
        StorageBackend::Filesystem => Arc::new(
            FsCacheStorage::new(
                settings.storage.directory.clone(),
                settings.storage.max_entries,
            )
            .map_err(InfraError::from)?,
        ),
    };
    Ok(storage)
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let storage = build_storage(&settings)?;
    let network: Arc<dyn Network> = Arc::new(ReqwestNetwork::new(
        &settings.upstream,
        settings.engine.scope.clone(),
    )?);
    let sessions = Arc::new(SessionHub::new());

    let engine = Arc::new(Engine::new(
        settings.engine.clone(),
        EngineDeps {
            storage,
            network: network.clone(),
            sessions: sessions.clone(),
            notifier: sessions.clone(),
        },
    ));

    let router = http::build_router(http::HttpState {
        engine: engine.clone(),
        network,
        sessions,
    });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        addr = %settings.server.addr,
        scope = %settings.engine.scope,
        upstream = %settings.upstream.base_url,
        "waystation listening"
    );

    let lifecycle = engine.clone();
    tokio::spawn(async move {
        match lifecycle.start().await {
            Ok(state) => info!(state = state.as_str(), "engine started"),
            Err(err) => error!(error = %err, "engine failed to start, requests pass through"),
        }
    });

    let shutdown = Arc::new(Notify::new());
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.notified().await }
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = shutdown_signal() => {
            info!("shutdown requested, draining connections");
            shutdown.notify_one();
            match tokio::time::timeout(settings.server.graceful_shutdown, server).await {
                Ok(result) => {
                    result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
                }
                Err(_) => warn!("graceful shutdown timed out, closing remaining connections"),
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn run_classify(settings: &Settings, args: &ClassifyArgs) -> Result<(), AppError> {
    let url = Url::parse(&args.url)
        .or_else(|_| settings.engine.resolve(&args.url))
        .map_err(|err| AppError::validation(format!("invalid url `{}`: {err}", args.url)))?;

    let destination = if args.navigate {
        RequestDestination::Document
    } else {
        RequestDestination::Other
    };
    let request = FetchRequest::new(Method::parse(&args.method), url).with_destination(destination);

    let registry = NamespaceRegistry::new(&settings.engine);
    let classification = RequestClassifier::new(&settings.engine).classify(&request);

    match classification.route() {
        Some((strategy, role)) => println!(
            "{} {} -> {} via {} in {}",
            request.method,
            request.url,
            classification.as_str(),
            strategy.as_str(),
            registry.current_identifier(role)
        ),
        None => println!(
            "{} {} -> {} (network only)",
            request.method,
            request.url,
            classification.as_str()
        ),
    }
    Ok(())
}

async fn run_namespaces(settings: &Settings) -> Result<(), AppError> {
    let registry = NamespaceRegistry::new(&settings.engine);
    for id in registry.current_identifiers() {
        println!("{id}\tcurrent");
    }

    if settings.storage.backend == StorageBackend::Filesystem {
        let storage = build_storage(settings)?;
        let stored = storage
            .namespaces()
            .await
            .map_err(|err| AppError::from(InfraError::from(err)))?;
        for id in stored.iter().filter(|id| registry.is_stale(id)) {
            println!("{id}\tstale");
        }
    }
    Ok(())
}
