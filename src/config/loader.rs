//! Bracketed `key = value` config file parsing (SPEC_FULL.md §6.2).
//!
//! Grounded on `original_source/server/vsx-config.c`'s accumulator style:
//! a bad line doesn't abort the parse, it's collected, and every bad line
//! found is reported together.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::types::{Config, GeneralConfig, ServerListenerConfig, TlsListenerConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read { path: PathBuf, #[source] source: std::io::Error },
    #[error("{0}")]
    Invalid(String),
    #[error("no [server] section found; at least one listener is required")]
    NoListeners,
}

#[derive(Debug, Default)]
struct Section {
    kind: SectionKind,
    entries: Vec<(String, String)>,
}

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
enum SectionKind {
    #[default]
    General,
    Server,
}

impl Config {
    /// Loads and validates the config file at `path`, then applies the
    /// `TILEWIRE_LOG_LEVEL` / `TILEWIRE_BIND_ADDR` environment overrides
    /// (SPEC_FULL.md §6.2 "Ambient").
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path.display().to_string();
        let mut config = Self::parse(&text, &file_name)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parses already-read config text; split out of [`Config::load`] so
    /// tests don't need a filesystem round trip.
    fn parse(text: &str, file_label: &str) -> Result<Config, ConfigError> {
        let sections = split_sections(text, file_label)?;

        let mut general = GeneralConfig::default();
        let mut servers = Vec::new();
        let mut errors = Vec::new();

        for section in sections {
            match section.kind {
                SectionKind::General => {
                    apply_general(&mut general, &section.entries, file_label, &mut errors);
                }
                SectionKind::Server => {
                    if let Some(listener) =
                        parse_server_section(&section.entries, file_label, &mut errors)
                    {
                        servers.push(listener);
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors.join("\n")));
        }
        if servers.is_empty() {
            return Err(ConfigError::NoListeners);
        }

        Ok(Config { general, servers })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("TILEWIRE_BIND_ADDR") {
            if let (Ok(parsed), Some(first)) = (addr.parse::<SocketAddr>(), self.servers.first_mut())
            {
                first.address = parsed;
            }
        }
        // `TILEWIRE_LOG_LEVEL` is read directly by `logging::init`, which
        // already takes env-vs-config precedence into account; nothing to
        // store on `GeneralConfig` for it.
    }
}

fn split_sections(text: &str, file_label: &str) -> Result<Vec<Section>, ConfigError> {
    let mut sections = Vec::new();
    let mut current: Option<Section> = None;
    let mut errors = Vec::new();

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if let Some(section) = current.take() {
                sections.push(section);
            }
            let kind = match name.trim() {
                "general" => SectionKind::General,
                "server" => SectionKind::Server,
                other => {
                    errors.push(format!("{file_label}:{}: unknown section '[{other}]'", lineno + 1));
                    current = None;
                    continue;
                }
            };
            current = Some(Section { kind, entries: Vec::new() });
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            errors.push(format!("{file_label}:{}: expected 'key = value', found '{line}'", lineno + 1));
            continue;
        };
        let Some(section) = current.as_mut() else {
            errors.push(format!(
                "{file_label}:{}: key '{}' outside of any section",
                lineno + 1,
                key.trim()
            ));
            continue;
        };
        section
            .entries
            .push((key.trim().to_string(), value.trim().to_string()));
    }
    if let Some(section) = current.take() {
        sections.push(section);
    }

    if !errors.is_empty() {
        return Err(ConfigError::Invalid(errors.join("\n")));
    }
    Ok(sections)
}

fn apply_general(
    general: &mut GeneralConfig,
    entries: &[(String, String)],
    file_label: &str,
    errors: &mut Vec<String>,
) {
    for (key, value) in entries {
        match key.as_str() {
            "log_file" if !value.is_empty() => general.log_file = Some(PathBuf::from(value)),
            "log_file" => {}
            "user" if !value.is_empty() => general.user = Some(value.clone()),
            "user" => {}
            "group" if !value.is_empty() => general.group = Some(value.clone()),
            "group" => {}
            other => errors.push(format!("{file_label}: unknown key '{other}' in [general]")),
        }
    }
}

fn parse_server_section(
    entries: &[(String, String)],
    file_label: &str,
    errors: &mut Vec<String>,
) -> Option<ServerListenerConfig> {
    let mut address: Option<String> = None;
    let mut port: Option<u16> = None;
    let mut certificate: Option<PathBuf> = None;
    let mut private_key: Option<PathBuf> = None;
    let mut private_key_password: Option<String> = None;

    for (key, value) in entries {
        match key.as_str() {
            "address" => address = Some(value.clone()),
            "port" => match value.parse::<u16>() {
                Ok(p) => port = Some(p),
                Err(_) => errors.push(format!("{file_label}: invalid port '{value}' in [server]")),
            },
            "certificate" if !value.is_empty() => certificate = Some(PathBuf::from(value)),
            "certificate" => {}
            "private_key" if !value.is_empty() => private_key = Some(PathBuf::from(value)),
            "private_key" => {}
            "private_key_password" if !value.is_empty() => {
                private_key_password = Some(value.clone());
            }
            "private_key_password" => {}
            other => errors.push(format!("{file_label}: unknown key '{other}' in [server]")),
        }
    }

    let resolved_address = match (address, port) {
        (Some(addr_str), Some(explicit_port)) => {
            let host = addr_str.rsplit_once(':').map_or(addr_str.as_str(), |(h, _)| h);
            format!("{host}:{explicit_port}").parse::<SocketAddr>()
        }
        (Some(addr_str), None) => addr_str.parse::<SocketAddr>(),
        (None, Some(explicit_port)) => format!("0.0.0.0:{explicit_port}").parse::<SocketAddr>(),
        (None, None) => {
            errors.push(format!("{file_label}: [server] section is missing 'address' or 'port'"));
            return None;
        }
    };
    let address = match resolved_address {
        Ok(addr) => addr,
        Err(err) => {
            errors.push(format!("{file_label}: invalid [server] address: {err}"));
            return None;
        }
    };

    let tls = match (certificate, private_key) {
        (Some(certificate), Some(private_key)) => Some(TlsListenerConfig {
            certificate,
            private_key,
            private_key_password,
        }),
        (None, None) => None,
        (Some(_), None) => {
            errors.push(format!(
                "{file_label}: [server] has 'certificate' without 'private_key'"
            ));
            return None;
        }
        (None, Some(_)) => {
            errors.push(format!(
                "{file_label}: [server] has 'private_key' without 'certificate'"
            ));
            return None;
        }
    };

    Some(ServerListenerConfig { address, tls })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[general]
log_file = /var/log/tilewire/server.log
user = tilewire
group = tilewire

[server]
address = 0.0.0.0
port = 5144

[server]
address = 0.0.0.0
port = 5145
certificate = /etc/tilewire/cert.pem
private_key = /etc/tilewire/key.pem
"#;

    #[test]
    fn parses_general_and_repeated_server_sections() {
        let cfg = Config::parse(SAMPLE, "test.conf").expect("valid config");
        assert_eq!(cfg.general.user.as_deref(), Some("tilewire"));
        assert_eq!(cfg.servers.len(), 2);
        assert_eq!(cfg.servers[0].address.port(), 5144);
        assert!(cfg.servers[0].tls.is_none());
        assert_eq!(cfg.servers[1].address.port(), 5145);
        assert!(cfg.servers[1].tls.is_some());
    }

    #[test]
    fn rejects_certificate_without_private_key() {
        let text = "[server]\naddress = 0.0.0.0\nport = 5144\ncertificate = /etc/cert.pem\n";
        let err = Config::parse(text, "test.conf").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn collects_every_bad_line_before_failing() {
        let text = "[general]\nbogus_key = 1\n[server]\naddress = 0.0.0.0\nport = 5144\nanother_bogus = 2\n";
        let err = Config::parse(text, "test.conf").unwrap_err();
        let ConfigError::Invalid(message) = err else {
            panic!("expected Invalid");
        };
        assert!(message.contains("bogus_key"));
        assert!(message.contains("another_bogus"));
        assert_eq!(message.lines().count(), 2);
    }

    #[test]
    fn missing_server_section_is_rejected() {
        let text = "[general]\nuser = tilewire\n";
        assert!(matches!(Config::parse(text, "test.conf"), Err(ConfigError::NoListeners)));
    }

    #[test]
    fn bind_addr_env_override_replaces_first_listener() {
        let mut cfg = Config::parse(SAMPLE, "test.conf").expect("valid config");
        std::env::set_var("TILEWIRE_BIND_ADDR", "127.0.0.1:9000");
        cfg.apply_env_overrides();
        std::env::remove_var("TILEWIRE_BIND_ADDR");
        assert_eq!(cfg.servers[0].address.to_string(), "127.0.0.1:9000");
    }
}
