//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/arborist/arborist.toml`
//! 3. Local config: `<project_dir>/.arborist.toml`, or the file given with `--config`
//! 4. Environment variables: `ARBORIST_*` prefix

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::ApplicationError;
use crate::domain::dialect::DialectKind;
use crate::domain::metadata::TreeMetadata;
use crate::util::path::{expand_path, resolve};

/// Raw settings for intermediate parsing.
///
/// `None` means "not specified, inherit from the layer below".
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub database: Option<PathBuf>,
    pub dialect: Option<DialectKind>,
    pub entities: Option<Vec<TreeMetadata>>,
}

/// Unified configuration for arborist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// SQLite database file (default: arborist.db, relative to the project dir)
    pub database: PathBuf,
    /// SQL dialect statements are rendered for
    pub dialect: DialectKind,
    /// Entity descriptors, addressed by their `entity` name
    pub entities: Vec<TreeMetadata>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("arborist.db"),
            dialect: DialectKind::default(),
            entities: Vec::new(),
        }
    }
}

/// Get the XDG config directory for arborist.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "arborist").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("arborist.toml"))
}

/// Get the path to the local config file in a project directory.
pub fn local_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".arborist.toml")
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

/// Overlay entity descriptors by name: same name replaces, new names append.
fn merge_entities(base: &[TreeMetadata], overlay: &[TreeMetadata]) -> Vec<TreeMetadata> {
    let mut result = base.to_vec();
    for entity in overlay {
        match result.iter_mut().find(|e| e.entity == entity.entity) {
            Some(existing) => *existing = entity.clone(),
            None => result.push(entity.clone()),
        }
    }
    result
}

impl Settings {
    /// Expand shell variables and tilde in path-like fields.
    fn expand_paths(&mut self) {
        self.database = expand_path(&self.database);
    }

    /// Merge overlay config onto self (base).
    ///
    /// - Scalar options: overlay wins if Some, otherwise keep base
    /// - Entities: overlay by entity name
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            database: overlay
                .database
                .clone()
                .unwrap_or_else(|| self.database.clone()),
            dialect: overlay.dialect.unwrap_or(self.dialect),
            entities: overlay
                .entities
                .as_ref()
                .map(|o| merge_entities(&self.entities, o))
                .unwrap_or_else(|| self.entities.clone()),
        }
    }

    /// Apply global config onto defaults; the global entity list replaces the defaults.
    fn apply_global(&self, global: &RawSettings) -> Self {
        Self {
            database: global
                .database
                .clone()
                .unwrap_or_else(|| self.database.clone()),
            dialect: global.dialect.unwrap_or(self.dialect),
            entities: global
                .entities
                .clone()
                .unwrap_or_else(|| self.entities.clone()),
        }
    }

    /// Load settings with layered precedence.
    ///
    /// # Arguments
    /// * `project_dir` - Directory holding `.arborist.toml`; relative database paths resolve against it
    /// * `config_file` - Explicit local config, replaces `.arborist.toml` and must exist
    ///
    /// # Precedence (lowest to highest)
    /// 1. Compiled defaults
    /// 2. Global config: `$XDG_CONFIG_HOME/arborist/arborist.toml`
    /// 3. Local config (entities overlay global ones by name)
    /// 4. Environment variables: `ARBORIST_DATABASE`, `ARBORIST_DIALECT`
    pub fn load(
        project_dir: Option<&Path>,
        config_file: Option<&Path>,
    ) -> Result<Self, ApplicationError> {
        // 1. Start with defaults
        let mut current = Self::default();

        // 2. Load global config
        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                let raw = load_raw_settings(&global_path)?;
                current = current.apply_global(&raw);
            }
        }

        // 3. Load and merge local config
        match (config_file, project_dir) {
            (Some(path), _) => {
                if !path.exists() {
                    return Err(ApplicationError::Config {
                        message: format!("config file not found: {}", path.display()),
                    });
                }
                current = current.merge_with(&load_raw_settings(path)?);
            }
            (None, Some(dir)) => {
                let local_path = local_config_path(dir);
                if local_path.exists() {
                    current = current.merge_with(&load_raw_settings(&local_path)?);
                }
            }
            (None, None) => {}
        }

        // 4. Apply environment variables (replaces - explicit override)
        current = Self::apply_env_overrides(current)?;

        current.expand_paths();
        if let Some(dir) = project_dir {
            current.database = resolve(dir, &current.database);
        }
        current.validate()?;

        Ok(current)
    }

    /// Apply ARBORIST_* environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self) -> Result<Self, ApplicationError> {
        let config = Config::builder()
            .add_source(Environment::with_prefix("ARBORIST").separator("__"))
            .build()
            .map_err(config_err)?;

        if let Ok(val) = config.get_string("database") {
            settings.database = PathBuf::from(val);
        }
        if let Ok(val) = config.get_string("dialect") {
            settings.dialect = val
                .parse()
                .map_err(|message: String| ApplicationError::Config { message })?;
        }

        Ok(settings)
    }

    /// Every descriptor must be consistent and entity names unique.
    fn validate(&self) -> Result<(), ApplicationError> {
        for (i, entity) in self.entities.iter().enumerate() {
            entity.validate()?;
            if self.entities[..i].iter().any(|e| e.entity == entity.entity) {
                return Err(ApplicationError::Config {
                    message: format!("entity {} declared twice", entity.entity),
                });
            }
        }
        Ok(())
    }

    /// Descriptor of the entity called `name`.
    pub fn entity(&self, name: &str) -> Result<&TreeMetadata, ApplicationError> {
        self.entities
            .iter()
            .find(|e| e.entity == name)
            .ok_or_else(|| ApplicationError::UnknownEntity(name.to_string()))
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# arborist configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/arborist/arborist.toml
#   Local:  <project_dir>/.arborist.toml  (or --config <file>)
#   Env:    ARBORIST_DATABASE, ARBORIST_DIALECT
#
# Local entities replace global entities with the same name.

# SQLite database file, relative paths resolve against the project dir
# database = "arborist.db"

# Dialect used to render statements: sqlite, postgres, mysql
# dialect = "sqlite"

[[entities]]
entity = "Category"
table = "category"
primary_columns = [{ name = "id", type = "integer" }]
parent_columns = [{ referenced_column = "id" }]
columns = [{ name = "name", type = "text" }]

# One of:
#   { type = "closure-table", table = "category_closure",
#     ancestor_columns = ["id_ancestor"], descendant_columns = ["id_descendant"] }
#   { type = "nested-set", left = "nsleft", right = "nsright" }
#   { type = "materialized-path", column = "mpath" }
[entities.tree]
type = "materialized-path"
column = "mpath"
"#
        .to_string()
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}
