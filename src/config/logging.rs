//! Logging configuration derived from `[general] log_file` plus the CLI
//! `-l` override and the `TILEWIRE_LOG_LEVEL` environment variable
//! (SPEC_FULL.md §6.2, §6.4).

use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `None` means stdout-only.
    pub file: Option<PathBuf>,
    /// Resolved precedence: CLI/env beats config file beats "info"
    /// (SPEC_FULL.md §6.2 "Ambient", §6.4).
    pub level: String,
}

impl LoggingConfig {
    #[must_use]
    pub fn resolve(config_log_file: Option<PathBuf>, cli_log_file: Option<PathBuf>) -> Self {
        let level = std::env::var("TILEWIRE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        Self { file: cli_log_file.or(config_log_file), level }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_log_file_overrides_config_file() {
        let resolved =
            LoggingConfig::resolve(Some(PathBuf::from("/var/log/a.log")), Some(PathBuf::from("/tmp/b.log")));
        assert_eq!(resolved.file, Some(PathBuf::from("/tmp/b.log")));
    }

    #[test]
    fn defaults_to_stdout_when_nothing_configured() {
        let resolved = LoggingConfig::resolve(None, None);
        assert_eq!(resolved.file, None);
    }
}
