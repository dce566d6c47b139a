use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use maven_bridge::AppState;
use mimalloc::MiMalloc;
use quarry_index::{IndexManager, Job, JobScheduler};
use quarry_repo::{AccessControl, Registry, Resolver, Settings};
use quarry_store::{ItemStore, LockTimeouts};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Serve Maven-style artifact repositories over HTTP.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the repository configuration file.
    #[arg(long, env, default_value = "quarry.toml")]
    config: PathBuf,

    /// Directory holding the item database and content blobs.
    #[arg(long, env, default_value = "data")]
    data_dir: PathBuf,

    /// Seconds between indexing passes.
    #[arg(long, env, default_value_t = 600)]
    index_period_secs: u64,

    /// Seconds between lock sweeps.
    #[arg(long, env, default_value_t = 900)]
    gc_period_secs: u64,

    /// Seconds between trash purge passes.
    #[arg(long, env, default_value_t = 3_600)]
    trash_purge_period_secs: u64,

    /// Seconds a trashed item lingers before a purge pass removes it.
    #[arg(long, env, default_value_t = 86_400)]
    trash_retention_secs: u64,

    /// A global log level to use when printing logs.
    /// It's also possible to set `RUST_LOG` according to
    /// `tracing_subscriber::filter::EnvFilter`, which will always have
    /// priority.
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    /// The address to listen on.
    #[clap(flatten)]
    listen_args: tokio_listener::ListenerAddressLFlag,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    quarry_tracing::TracingBuilder::default()
        .level(cli.log_level)
        .enable_progressbar()
        .build()?;

    let settings = Settings::load(&cli.config).await?;
    let store = Arc::new(ItemStore::open(&cli.data_dir, LockTimeouts::default()).await?);
    let registry = Arc::new(Registry::from_settings(&settings)?);
    let access = AccessControl::new(settings.access_rules.clone());
    let resolver = Arc::new(Resolver::new(store.clone(), registry, access));
    let index = Arc::new(IndexManager::new(store.clone(), resolver.clone()));

    let state = AppState::new(resolver, index.clone());
    let app = maven_bridge::gen_router().with_state(state);

    let cancel = CancellationToken::new();

    let mut scheduler = JobScheduler::new();
    scheduler.register(Job {
        name: "indexer",
        period: Duration::from_secs(cli.index_period_secs),
        excludes: &["gc"],
        run: Arc::new({
            let index = index.clone();
            move |cancel| {
                let index = index.clone();
                Box::pin(async move {
                    index.run(&cancel).await;
                })
            }
        }),
    });
    scheduler.register(Job {
        name: "gc",
        period: Duration::from_secs(cli.gc_period_secs),
        excludes: &["indexer"],
        run: Arc::new({
            let store = store.clone();
            move |_cancel| {
                let store = store.clone();
                Box::pin(async move {
                    let swept = store.sweep_locks();
                    debug!(swept, "lock sweep finished");
                })
            }
        }),
    });
    scheduler.register(Job {
        name: "trash-purge",
        period: Duration::from_secs(cli.trash_purge_period_secs),
        excludes: &[],
        run: Arc::new({
            let store = store.clone();
            let retention = Duration::from_secs(cli.trash_retention_secs);
            move |_cancel| {
                let store = store.clone();
                Box::pin(async move {
                    match store.purge_trash(retention).await {
                        Ok(purged) => debug!(purged, "trash purge finished"),
                        Err(e) => warn!(err = %e, "trash purge failed"),
                    }
                })
            }
        }),
    });
    let job_handles = scheduler.spawn(&cancel);

    let listen_address = &cli.listen_args.listen_address.unwrap_or_else(|| {
        "[::]:8000"
            .parse()
            .expect("invalid fallback listen address")
    });

    let listener = tokio_listener::Listener::bind(
        listen_address,
        &Default::default(),
        &cli.listen_args.listener_options,
    )
    .await?;

    info!(listen_address=%listen_address, "starting daemon");

    tokio::select! {
        result = tokio_listener::axum07::serve(
            listener,
            app.into_make_service_with_connect_info::<tokio_listener::SomeSocketAddrClonable>(),
        ) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    cancel.cancel();
    for handle in job_handles {
        let _ = handle.await;
    }

    Ok(())
}
