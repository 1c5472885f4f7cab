// config.rs — Where the ledger lives and how the CLI logs.
//
// `LedgerConfig::for_project()` lays everything out under a `.nightledger/`
// directory in the project root. An optional `.nightledger/config.toml` can
// override the database path and how the CLI logs:
//
//   database = "/var/lib/nightledger/ledger.db"
//   log_filter = "nl_governance=debug"
//   log_format = "json"

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Default tracing directives when neither RUST_LOG nor the config sets one.
pub const DEFAULT_LOG_FILTER: &str = "nl_ledger=info,nl_governance=info,nl_cli=info";

/// Shape of log lines written to stderr.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line, for log shippers.
    Json,
}

/// Resolved CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Root directory of the project.
    pub project_root: PathBuf,

    /// `.nightledger/` under the project root.
    pub ledger_dir: PathBuf,

    /// SQLite database file.
    pub database: PathBuf,

    /// tracing-subscriber filter directives.
    pub log_filter: String,

    pub log_format: LogFormat,
}

/// On-disk overrides, all optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    database: Option<PathBuf>,
    #[serde(default)]
    log_filter: Option<String>,
    #[serde(default)]
    log_format: Option<LogFormat>,
}

impl LedgerConfig {
    /// Defaults for a project rooted at `project_root`.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref().to_path_buf();
        let ledger_dir = root.join(".nightledger");
        Self {
            project_root: root,
            database: ledger_dir.join("ledger.db"),
            ledger_dir,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_format: LogFormat::Text,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.ledger_dir.join("config.toml")
    }

    /// Defaults plus whatever `.nightledger/config.toml` overrides.
    pub fn load(project_root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut config = Self::for_project(project_root);
        let path = config.config_file();
        if !path.exists() {
            return Ok(config);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file: ConfigFile = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;

        if let Some(database) = file.database {
            // Relative paths are relative to the project root.
            config.database = if database.is_absolute() {
                database
            } else {
                config.project_root.join(database)
            };
        }
        if let Some(filter) = file.log_filter {
            config.log_filter = filter;
        }
        if let Some(format) = file.log_format {
            config.log_format = format;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_live_under_dot_nightledger() {
        let config = LedgerConfig::for_project("/srv/agent");
        assert_eq!(config.database, PathBuf::from("/srv/agent/.nightledger/ledger.db"));
        assert_eq!(config.config_file(), PathBuf::from("/srv/agent/.nightledger/config.toml"));
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn missing_config_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let config = LedgerConfig::load(dir.path()).unwrap();
        assert_eq!(config, LedgerConfig::for_project(dir.path()));
    }

    #[test]
    fn config_file_overrides_database_and_filter() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".nightledger")).unwrap();
        std::fs::write(
            dir.path().join(".nightledger/config.toml"),
            "database = \"data/ledger.db\"\nlog_filter = \"nl_governance=debug\"\n",
        )
        .unwrap();

        let config = LedgerConfig::load(dir.path()).unwrap();
        assert_eq!(config.database, dir.path().join("data/ledger.db"));
        assert_eq!(config.log_filter, "nl_governance=debug");
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn config_file_selects_json_logs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".nightledger")).unwrap();
        std::fs::write(dir.path().join(".nightledger/config.toml"), "log_format = \"json\"\n").unwrap();
        assert_eq!(LedgerConfig::load(dir.path()).unwrap().log_format, LogFormat::Json);

        std::fs::write(dir.path().join(".nightledger/config.toml"), "log_format = \"xml\"\n").unwrap();
        assert!(LedgerConfig::load(dir.path()).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".nightledger")).unwrap();
        std::fs::write(dir.path().join(".nightledger/config.toml"), "colour = true\n").unwrap();
        assert!(LedgerConfig::load(dir.path()).is_err());
    }
}
