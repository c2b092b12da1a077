//! Service container for dependency injection
//!
//! Wires the configured database into tree repositories.

use std::sync::Arc;

use tracing::{debug, info};

use crate::application::services::TreeRepository;
use crate::application::ApplicationError;
use crate::config::Settings;
use crate::domain::dialect::{Dialect, DialectKind};
use crate::domain::query::create_tables;
use crate::infrastructure::error::{InfraError, InfraResult};
use crate::infrastructure::sqlite::SqliteDatabase;
use crate::infrastructure::traits::Database;

/// Container holding the settings and the shared database handle.
pub struct ServiceContainer {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Database every repository executes against
    pub db: Arc<dyn Database>,
}

impl ServiceContainer {
    /// Open the configured SQLite database.
    pub fn new(settings: Settings) -> InfraResult<Self> {
        if settings.dialect != DialectKind::Sqlite {
            return Err(ApplicationError::Config {
                message: format!(
                    "dialect {:?} can render statements but only sqlite can be executed",
                    settings.dialect
                ),
            }
            .into());
        }
        if let Some(dir) = settings.database.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| InfraError::io(format!("create {}", dir.display()), e))?;
        }
        let db = SqliteDatabase::open(&settings.database)?;
        info!("opened {}", settings.database.display());
        Ok(Self::with_deps(settings, Arc::new(db)))
    }

    /// Create a service container with a custom database (for testing).
    pub fn with_deps(settings: Settings, db: Arc<dyn Database>) -> Self {
        Self {
            settings: Arc::new(settings),
            db,
        }
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        self.settings.dialect.dialect()
    }

    /// Repository for the configured entity called `name`.
    pub fn repository(&self, name: &str) -> InfraResult<TreeRepository> {
        let metadata = self.settings.entity(name)?.clone();
        Ok(TreeRepository::new(metadata, self.dialect(), self.db.clone())?)
    }

    /// Create the tables of every configured entity; returns the number of statements run.
    pub async fn init_schema(&self) -> InfraResult<usize> {
        let dialect = self.dialect();
        let mut count = 0;
        for metadata in &self.settings.entities {
            for statement in create_tables(&dialect, metadata) {
                debug!("init_schema: {}", statement.sql);
                self.db
                    .execute(&statement)
                    .await
                    .map_err(|source| ApplicationError::OperationFailed {
                        context: format!("create tables for {}", metadata.entity),
                        source,
                    })?;
                count += 1;
            }
        }
        Ok(count)
    }
}
