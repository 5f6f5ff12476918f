//! Configuration loading for bitcode.
//!
//! The config file lives at `~/.bitcode/config.toml`. A missing file is not an
//! error; every section is optional.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct BitcodeConfig {
    pub app: Option<AppConfig>,
    /// Language server client settings.
    pub lsp: Option<bitcode_lsp::LspConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset (e.g. `"info,bitcode_lsp=debug"`).
    pub log_filter: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => path,
        }
    }
}

/// Replace `${VAR}` references with environment values.
///
/// Unset variables expand to the empty string; `${}` and an unclosed `${` are
/// kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(0) => {
                out.push_str("${}");
                rest = &after[1..];
            }
            Some(end) => {
                out.push_str(&env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

impl BitcodeConfig {
    /// Load `~/.bitcode/config.toml`. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    /// Load a specific file. `Ok(None)` when it does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        config.expand_server_env();
        Ok(Some(config))
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    fn expand_server_env(&mut self) {
        if let Some(server) = self.lsp.as_mut().and_then(|lsp| lsp.server.as_mut()) {
            server.command = expand_env_vars(&server.command);
            for arg in &mut server.args {
                *arg = expand_env_vars(arg);
            }
        }
    }

    /// The LSP settings, or defaults when the section is absent.
    #[must_use]
    pub fn lsp_or_default(&self) -> bitcode_lsp::LspConfig {
        self.lsp.clone().unwrap_or_default()
    }

    #[must_use]
    pub fn log_filter(&self) -> Option<&str> {
        self.app.as_ref().and_then(|app| app.log_filter.as_deref())
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".bitcode").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("hello world"), "hello world");
    }

    #[test]
    fn expand_env_vars_single_var() {
        unsafe {
            std::env::set_var("BITCODE_TEST_CONFIG_VAR", "replaced");
        }
        let result = expand_env_vars("prefix ${BITCODE_TEST_CONFIG_VAR} suffix");
        assert_eq!(result, "prefix replaced suffix");
        unsafe {
            std::env::remove_var("BITCODE_TEST_CONFIG_VAR");
        }
    }

    #[test]
    fn expand_env_vars_missing_var_becomes_empty() {
        let result = expand_env_vars("before ${BITCODE_MISSING_VAR_FOR_TEST} after");
        assert_eq!(result, "before  after");
    }

    #[test]
    fn expand_env_vars_adjacent_and_unicode() {
        unsafe {
            std::env::set_var("BITCODE_ADJ_A", "α");
            std::env::set_var("BITCODE_ADJ_B", "β");
        }
        assert_eq!(expand_env_vars("${BITCODE_ADJ_A}${BITCODE_ADJ_B}→"), "αβ→");
        unsafe {
            std::env::remove_var("BITCODE_ADJ_A");
            std::env::remove_var("BITCODE_ADJ_B");
        }
    }

    #[test]
    fn expand_env_vars_malformed_preserved() {
        assert_eq!(expand_env_vars("test ${} more"), "test ${} more");
        assert_eq!(expand_env_vars("test ${UNCLOSED"), "test ${UNCLOSED");
    }

    #[test]
    fn load_from_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = BitcodeConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn load_from_full_file() {
        unsafe {
            std::env::set_var("BITCODE_TEST_LSP_HOME", "/opt/ra");
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[app]
log_filter = "debug"

[lsp]
debounce_ms = 75
queue_capacity = 8
complete_after_change = true

[lsp.server]
command = "${BITCODE_TEST_LSP_HOME}/rust-analyzer"
args = ["--log", "${BITCODE_TEST_LSP_HOME}/ra.log"]
root_markers = ["Cargo.toml", ".git"]
"#,
        )
        .unwrap();

        let config = BitcodeConfig::load_from(&path).unwrap().unwrap();
        assert_eq!(config.log_filter(), Some("debug"));
        let lsp = config.lsp_or_default();
        assert_eq!(lsp.debounce_ms, 75);
        assert_eq!(lsp.queue_capacity, 8);
        assert!(lsp.complete_after_change);
        assert_eq!(lsp.request_timeout_ms, 30_000);
        let server = lsp.server.unwrap();
        assert_eq!(server.command, "/opt/ra/rust-analyzer");
        assert_eq!(server.args, vec!["--log", "/opt/ra/ra.log"]);
        assert_eq!(server.root_markers, vec!["Cargo.toml", ".git"]);
        unsafe {
            std::env::remove_var("BITCODE_TEST_LSP_HOME");
        }
    }

    #[test]
    fn empty_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        let config = BitcodeConfig::load_from(&path).unwrap().unwrap();
        assert!(config.log_filter().is_none());
        let lsp = config.lsp_or_default();
        assert!(lsp.enabled);
        assert_eq!(lsp.debounce_ms, 150);
        assert!(lsp.server.is_none());
    }

    #[test]
    fn parse_error_carries_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "invalid toml [").unwrap();

        let err = BitcodeConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), path);
    }

    #[test]
    fn read_error_carries_path() {
        let dir = tempfile::tempdir().unwrap();
        // A directory exists but cannot be read as a file.
        let err = BitcodeConfig::load_from(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert_eq!(err.path(), dir.path());
    }
}
