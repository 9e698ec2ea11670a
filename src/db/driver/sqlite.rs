use std::path::Path;

use async_trait::async_trait;
use fieldx::fxstruct;
use sea_orm::ConnectionTrait;
use sea_orm::DatabaseConnection;
use tracing::error;

use crate::error::StoreError;

use super::DatabaseDriver;

#[derive(Debug)]
#[fxstruct(sync, no_new)]
pub struct Sqlite {
    connection: DatabaseConnection,
}

impl Sqlite {
    /// Opens (creating when missing) the database file `db_name` under `db_dir`.
    pub async fn connect(db_dir: &Path, db_name: &str) -> Result<Self, StoreError> {
        let db_path = db_dir.join(db_name);
        Self::connect_url(&format!("sqlite://{}?mode=rwc", db_path.display())).await
    }

    pub async fn connect_url(url: &str) -> Result<Self, StoreError> {
        let db = sea_orm::Database::connect(url)
            .await
            .inspect_err(|e| error!(backend = "sqlite", "Error connecting to database: {e}"))?;

        Ok(Self { connection: db })
    }
}

#[async_trait]
impl DatabaseDriver for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn connection(&self) -> DatabaseConnection {
        self.connection.clone()
    }

    async fn configure(&self) -> Result<(), StoreError> {
        // Kept in the database file, so it holds for every pooled connection. Per-connection settings such as the busy
        // timeout are left to sqlx, which sets 5s on each connection it opens.
        self.connection.execute_unprepared("PRAGMA journal_mode=WAL;").await?;

        Ok(())
    }

    async fn checkpoint(&self) -> Result<(), StoreError> {
        self.connection.execute_unprepared("PRAGMA wal_checkpoint;").await?;

        Ok(())
    }
}
