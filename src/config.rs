//! Configuration file handling.
//!
//! This module provides loading and parsing of `.reactive_er.json`
//! configuration files. The database section selects the driver; the
//! optional engine section tunes engine behavior.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{DatabaseConfig, PostgresConfig};

/// Default configuration file name, looked up in the current directory.
pub const CONFIG_FILE: &str = ".reactive_er.json";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "Configuration file not found: {path}\n\n\
         Create it with a database section, for example:\n\
         {{ \"database\": {{ \"type\": \"sqlite\", \"path\": \"./data.sqlite\" }} }}"
    )]
    NotFound { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid database url: {0}")]
    InvalidUrl(String),
}

/// Top-level configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Database configuration
    pub database: DatabaseConfigFile,

    /// Engine options
    #[serde(default)]
    pub engine: EngineOptions,
}

/// Database configuration variants for different drivers.
///
/// JSON format uses a "type" field with lowercase variant names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatabaseConfigFile {
    /// SQLite database file
    Sqlite { path: PathBuf },
    /// In-memory SQLite
    #[serde(rename = "memory")]
    Mem,
    /// PostgreSQL server
    Postgres(PostgresConfig),
}

/// Tunables for the engine itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Log every compiled statement at `info` level instead of `debug`.
    #[serde(default)]
    pub log_sql: bool,
}

impl ConfigFile {
    /// Load configuration from `.reactive_er.json` in the current directory.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Load configuration from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file doesn't exist, cannot be read, or is not
    /// valid configuration JSON.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl DatabaseConfigFile {
    /// Convert this configuration to a DatabaseConfig.
    pub fn to_database_config(&self) -> DatabaseConfig {
        match self {
            Self::Sqlite { path } => DatabaseConfig::Sqlite { path: path.clone() },
            Self::Mem => DatabaseConfig::Memory,
            Self::Postgres(pg) => DatabaseConfig::Postgres(pg.clone()),
        }
    }
}

/// Resolve the database configuration and engine options.
///
/// Priority: config file at `path` > `DATABASE_URL` > `./data.sqlite`.
/// Engine options only come from the config file.
pub fn resolve_config(path: &Path) -> Result<(DatabaseConfig, EngineOptions), ConfigError> {
    match ConfigFile::load_from(path) {
        Ok(config) => return Ok((config.database.to_database_config(), config.engine)),
        Err(ConfigError::NotFound { .. }) => {}
        Err(e) => return Err(e),
    }

    let database = match DatabaseConfig::from_env()? {
        Some(config) => config,
        None => DatabaseConfig::from_url("./data.sqlite")?,
    };
    Ok((database, EngineOptions::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sqlite_deserialization() {
        let json = r#"
        {
            "database": {
                "type": "sqlite",
                "path": "./data.sqlite"
            }
        }
        "#;
        let config: ConfigFile = serde_json::from_str(json).unwrap();
        assert!(matches!(config.database, DatabaseConfigFile::Sqlite { .. }));
        assert_eq!(config.engine, EngineOptions::default());
    }

    #[test]
    fn test_memory_deserialization_with_engine_options() {
        let json = r#"
        {
            "database": { "type": "memory" },
            "engine": { "log_sql": true }
        }
        "#;
        let config: ConfigFile = serde_json::from_str(json).unwrap();
        assert!(matches!(config.database, DatabaseConfigFile::Mem));
        assert!(config.engine.log_sql);
    }

    #[test]
    fn test_postgres_with_individual_fields() {
        let json = r#"
        {
            "database": {
                "type": "postgres",
                "host": "localhost",
                "user": "myuser",
                "database": "mydb",
                "port": 5433
            }
        }
        "#;
        let config: ConfigFile = serde_json::from_str(json).unwrap();
        match config.database {
            DatabaseConfigFile::Postgres(pg) => {
                assert_eq!(pg.host.as_deref(), Some("localhost"));
                assert_eq!(pg.port, 5433);
                assert_eq!(pg.password, None);
            }
            _ => panic!("Expected Postgres variant"),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigFile::load_from(&dir.path().join(CONFIG_FILE)).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_load_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ invalid json }").unwrap();
        file.flush().unwrap();

        let err = ConfigFile::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_resolve_config_reads_engine_options() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"database": {"type": "memory"}, "engine": {"log_sql": true}}"#)
            .unwrap();
        file.flush().unwrap();

        let (database, options) = resolve_config(file.path()).unwrap();
        assert_eq!(database, DatabaseConfig::Memory);
        assert!(options.log_sql);
    }

    #[test]
    fn test_resolve_config_propagates_parse_errors() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ \"database\": 1 }").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            resolve_config(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"database": {"type": "sqlite", "path": "./x.sqlite"}}"#)
            .unwrap();
        file.flush().unwrap();

        let config = ConfigFile::load_from(file.path()).unwrap();
        assert_eq!(
            config.database.to_database_config(),
            DatabaseConfig::Sqlite {
                path: PathBuf::from("./x.sqlite")
            }
        );
    }
}
