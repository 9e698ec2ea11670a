use std::io;
use std::sync::Arc;
use std::sync::Mutex;

use clap::error::ErrorKind;
use clap::CommandFactory;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use crate::config::Config;
use crate::db::SeaStore;
use crate::engine::SyncEngine;
use crate::server;

const DEFAULT_LOG_FILTER: &str = "inventory_sync=info,tower_http=info";

/// The `inventory-sync` process: stores, engine, scheduler and HTTP surface wired from one [`Config`].
#[derive(Debug)]
pub struct SyncApp {
    config: Config,
}

impl SyncApp {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Reads the command line and environment. Bad arguments end the process with clap's usual report.
    pub fn from_env() -> Self {
        let config = Config::parse();
        if let Err(err) = config.check() {
            let mut cmd = Config::command();
            cmd.error(ErrorKind::InvalidValue, err).exit();
        }
        Self::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn execute(&self) -> anyhow::Result<()> {
        self.setup_tracing()?;
        self.run().await
    }

    /// Everything [`execute`](Self::execute) does apart from installing the global subscriber.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(config = ?self.config, "Starting inventory sync");

        let primary = Arc::new(self.open_store("primary", &self.config.primary_url()).await?);
        let replica = Arc::new(self.open_store("replica", &self.config.replica_url()).await?);

        let engine = Arc::new(SyncEngine::new(
            self.config.engine_settings(),
            primary.clone(),
            replica.clone(),
        ));

        if self.config.once() {
            let report = engine.sync_once().await?;
            info!(?report, "Single sync cycle finished");
        }
        else {
            self.serve(engine).await?;
        }

        for store in [&primary, &replica] {
            if let Err(err) = store.driver().checkpoint().await {
                error!(store = %store.driver().name(), "Checkpoint failed: {err}");
            }
        }

        info!("Inventory sync stopped");
        Ok(())
    }

    async fn open_store(&self, name: &str, url: &str) -> anyhow::Result<SeaStore> {
        let store = SeaStore::connect(name, url, self.config.max_connections()).await?;
        if !self.config.skip_migrations() {
            store.migrate().await?;
        }
        Ok(store)
    }

    async fn serve(&self, engine: Arc<SyncEngine>) -> anyhow::Result<()> {
        let shutdown = CancellationToken::new();
        let listener = TcpListener::bind(self.config.listen()).await?;

        let scheduler = engine.spawn_scheduler(shutdown.clone());

        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("Shutdown requested");
                    signal_token.cancel();
                }
                _ = signal_token.cancelled() => (),
            }
        });

        let served = server::serve(engine, listener, shutdown.clone()).await;

        shutdown.cancel();
        scheduler.await?;
        served?;

        Ok(())
    }

    #[cfg(feature = "tracing-loki")]
    fn loki_layer(&self) -> anyhow::Result<Option<tracing_loki::Layer>> {
        let Some(url) = self.config.loki_url()
        else {
            return Ok(None);
        };

        let (loki, loki_task) = tracing_loki::builder()
            .label("app", "inventory_sync")?
            .extra_field("pid", format!("{}", std::process::id()))?
            .build_url(tracing_loki::url::Url::parse(&url)?)?;

        tokio::spawn(loki_task);

        Ok(Some(loki))
    }

    fn setup_tracing(&self) -> anyhow::Result<()> {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

        #[cfg(feature = "tracing-loki")]
        let loki = self.loki_layer()?;
        #[cfg(not(feature = "tracing-loki"))]
        let loki: Option<tracing_subscriber::layer::Identity> = None;

        let log_file = self.config.log_file();
        let dest_writer = Mutex::new(if let Some(log_file) = &log_file {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)?;
            Box::new(file) as Box<dyn io::Write + Send>
        }
        else {
            Box::new(io::stdout()) as Box<dyn io::Write + Send>
        });

        tracing_subscriber::registry()
            .with(filter)
            .with(loki)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(dest_writer)
                    .with_ansi(log_file.is_none()),
            )
            .try_init()?;

        info!("Tracing initialized");

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Can't listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Can't listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => (),
        _ = terminate => (),
    }
}
