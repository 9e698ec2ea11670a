use std::time::Duration;

use async_trait::async_trait;
use fieldx::fxstruct;
use sea_orm::ConnectOptions;
use sea_orm::ConnectionTrait;
use sea_orm::DatabaseConnection;
use tracing::error;

use crate::error::StoreError;

use super::url_scheme;
use super::DatabaseDriver;

#[fxstruct(sync, rc, no_new, builder)]
pub struct Pg {
    url:             String,
    #[fieldx(default(20))]
    max_connections: u32,
    #[fieldx(inner_mut, get(off), set, builder(off))]
    connection:      DatabaseConnection,
}

impl Pg {
    pub async fn connect(&self) -> Result<(), StoreError> {
        let mut opts = ConnectOptions::new(&self.url);
        opts.max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(20))
            .max_lifetime(Duration::from_secs(60))
            .test_before_acquire(true)
            .sqlx_logging(false);

        self.set_connection(
            sea_orm::Database::connect(opts)
                .await
                .inspect_err(|e| error!(backend = "postgres", "Error connecting to database: {e}"))?,
        );

        Ok(())
    }
}

impl std::fmt::Debug for Pg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pg")
            .field("scheme", &url_scheme(&self.url))
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DatabaseDriver for Pg {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn connection(&self) -> DatabaseConnection {
        self.connection.read().clone()
    }

    async fn configure(&self) -> Result<(), StoreError> {
        self.connection().ping().await?;

        Ok(())
    }

    async fn checkpoint(&self) -> Result<(), StoreError> {
        self.connection().execute_unprepared("CHECKPOINT;").await?;

        Ok(())
    }
}
