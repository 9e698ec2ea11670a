use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use fieldx::fxstruct;
use garde::Validate;

use crate::engine::EngineSettings;
use crate::error::Error;
use crate::types::Result;

/// Command line and environment configuration of the service.
#[derive(Clone, clap::Parser, Validate)]
#[fxstruct(no_new, get(copy))]
#[clap(about, version, name = "inventory-sync")]
pub struct Config {
    /// Database URL of the primary (source of truth) inventory.
    #[clap(long, env = "INVSYNC_PRIMARY_URL", default_value = "mysql://root@localhost/main_db")]
    #[fieldx(get(clone))]
    #[garde(length(min = 1))]
    primary_url: String,

    /// Database URL of the replica inventory.
    #[clap(long, env = "INVSYNC_REPLICA_URL", default_value = "mysql://root@localhost/backup_db")]
    #[fieldx(get(clone))]
    #[garde(length(min = 1))]
    replica_url: String,

    /// Connection pool size per database.
    #[clap(long, env = "INVSYNC_MAX_CONNECTIONS", default_value_t = 10)]
    #[garde(range(min = 1))]
    max_connections: u32,

    /// How often a sync cycle starts, in milliseconds.
    #[clap(long, env = "INVSYNC_SYNC_PERIOD_MS", default_value_t = 5_000)]
    #[garde(range(min = 10))]
    sync_period_ms: u64,

    /// A cycle running longer than this is abandoned, in milliseconds.
    #[clap(long, env = "INVSYNC_MAX_CYCLE_MS", default_value_t = 30_000)]
    #[garde(range(min = 10))]
    max_cycle_ms: u64,

    /// Look this far behind the replica watermark for changes, in milliseconds. Records found again are skipped.
    #[clap(long, env = "INVSYNC_WATERMARK_OVERLAP_MS", default_value_t = 10_000)]
    #[garde(skip)]
    watermark_overlap_ms: u64,

    /// Shared secret expected in the X-Webhook-Secret header.
    #[clap(long, env = "INVSYNC_WEBHOOK_SECRET", hide_env_values = true)]
    #[fieldx(get(clone))]
    #[garde(length(min = 1))]
    webhook_secret: String,

    /// Write webhook updates to the replica right away too.
    #[clap(long, env = "INVSYNC_MIRROR_TO_REPLICA", default_value_t = false)]
    #[garde(skip)]
    mirror_to_replica: bool,

    /// Address of the HTTP and WebSocket listener.
    #[clap(long, env = "INVSYNC_LISTEN", default_value = "0.0.0.0:3006")]
    #[garde(skip)]
    listen: SocketAddr,

    /// Events buffered per subscriber before new ones are dropped.
    #[clap(long, env = "INVSYNC_SUBSCRIBER_BUFFER", default_value_t = 64)]
    #[garde(range(min = 1))]
    subscriber_buffer: usize,

    /// Don't create missing tables at startup.
    #[clap(long, env = "INVSYNC_SKIP_MIGRATIONS", default_value_t = false)]
    #[garde(skip)]
    skip_migrations: bool,

    /// Run a single sync cycle and exit.
    #[clap(long, default_value_t = false)]
    #[garde(skip)]
    once: bool,

    /// Write logs into this file instead of stdout.
    #[clap(long, env = "INVSYNC_LOG_FILE")]
    #[fieldx(get(clone))]
    #[garde(skip)]
    log_file: Option<PathBuf>,

    /// Loki endpoint; only used when built with the tracing-loki feature.
    #[clap(long, env = "INVSYNC_LOKI_URL")]
    #[fieldx(get(clone))]
    #[garde(skip)]
    loki_url: Option<String>,
}

impl Config {
    /// Parses `args` and validates the result.
    pub fn from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = <Self as clap::Parser>::try_parse_from(args).map_err(|err| Error::Config(err.to_string()))?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|report| Error::Config(report.to_string()))
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_millis(self.sync_period_ms)
    }

    pub fn max_cycle_duration(&self) -> Duration {
        Duration::from_millis(self.max_cycle_ms)
    }

    pub fn watermark_overlap(&self) -> Duration {
        Duration::from_millis(self.watermark_overlap_ms)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings::default()
            .with_secret(self.webhook_secret())
            .with_sync_period(self.sync_period())
            .with_max_cycle_duration(self.max_cycle_duration())
            .with_watermark_overlap(self.watermark_overlap())
            .with_mirroring(self.mirror_to_replica)
            .with_subscriber_buffer(self.subscriber_buffer)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("primary", &crate::db::driver::url_scheme(&self.primary_url))
            .field("replica", &crate::db::driver::url_scheme(&self.replica_url))
            .field("max_connections", &self.max_connections)
            .field("sync_period_ms", &self.sync_period_ms)
            .field("max_cycle_ms", &self.max_cycle_ms)
            .field("watermark_overlap_ms", &self.watermark_overlap_ms)
            .field("webhook_secret", &"<redacted>")
            .field("mirror_to_replica", &self.mirror_to_replica)
            .field("listen", &self.listen)
            .field("subscriber_buffer", &self.subscriber_buffer)
            .field("skip_migrations", &self.skip_migrations)
            .field("once", &self.once)
            .field("log_file", &self.log_file)
            .finish_non_exhaustive()
    }
}
