#![cfg_attr(not(test), deny(clippy::panic))]

use std::path::PathBuf;

use clap::Parser;

use tilewire_core::config::{Config, LoggingConfig};
use tilewire_core::{logging, server};

/// tilewire -- real-time multiplayer anagram-game server
#[derive(Parser, Debug)]
#[command(name = "tilewire-server")]
#[command(about = "Networking core for a real-time multiplayer anagram game")]
#[command(version)]
struct Cli {
    /// Path to the server config file.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: PathBuf,

    /// Log file path, overrides the config file's `[general] log_file`.
    #[arg(short = 'l', long = "log-file", value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Accepted for compatibility; daemonizing is not implemented (process
    /// supervision is out of scope).
    #[arg(short = 'd', long = "daemonize")]
    daemonize: bool,

    /// Run as this user. Parsed and logged only; privilege dropping is not
    /// performed.
    #[arg(short = 'u', long = "user", value_name = "USER")]
    user: Option<String>,

    /// Run as this group. Parsed and logged only; privilege dropping is not
    /// performed.
    #[arg(short = 'g', long = "group", value_name = "GROUP")]
    group: Option<String>,

    /// Load and validate configuration, print a summary, and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    if cli.print_config {
        print_config_summary(&config);
        return Ok(());
    }

    let logging_cfg = LoggingConfig::resolve(config.general.log_file.clone(), cli.log_file.clone());
    logging::init(&logging_cfg);

    if cli.daemonize {
        tracing::warn!("-d/--daemonize was given but daemonizing is not implemented; continuing in the foreground");
    }
    if let Some(user) = cli.user.or_else(|| config.general.user.clone()) {
        tracing::info!(user = %user, "running as configured user requires external supervision");
    }
    if let Some(group) = cli.group.or_else(|| config.general.group.clone()) {
        tracing::info!(group = %group, "running as configured group requires external supervision");
    }

    tracing::info!(listeners = config.servers.len(), "starting tilewire-server");
    server::run(&config.servers).await
}

fn print_config_summary(config: &Config) {
    println!("Configuration loaded successfully");
    println!();
    println!("general:");
    println!(
        "  log_file: {}",
        config
            .general
            .log_file
            .as_ref()
            .map_or_else(|| "stdout".to_string(), |p| p.display().to_string())
    );
    println!("  user: {}", config.general.user.as_deref().unwrap_or("(none)"));
    println!("  group: {}", config.general.group.as_deref().unwrap_or("(none)"));
    println!();
    println!("servers ({}):", config.servers.len());
    for server in &config.servers {
        println!(
            "  {} (tls: {})",
            server.address,
            if server.tls.is_some() { "yes" } else { "no" }
        );
    }
}

#[cfg(test)]
mod cli_tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn requires_config_path() {
        let result = Cli::try_parse_from(["tilewire-server"]);
        assert!(result.is_err());
    }

    #[test]
    fn parses_config_and_log_file() {
        let cli = Cli::try_parse_from(["tilewire-server", "-c", "tilewire.conf", "-l", "/tmp/t.log"])
            .unwrap();
        assert_eq!(cli.config.to_str(), Some("tilewire.conf"));
        assert_eq!(cli.log_file.as_deref().and_then(|p| p.to_str()), Some("/tmp/t.log"));
        assert!(!cli.daemonize);
        assert!(!cli.print_config);
    }

    #[test]
    fn daemonize_and_user_group_flags_parse() {
        let cli = Cli::try_parse_from([
            "tilewire-server",
            "-c",
            "tilewire.conf",
            "-d",
            "-u",
            "tilewire",
            "-g",
            "tilewire",
        ])
        .unwrap();
        assert!(cli.daemonize);
        assert_eq!(cli.user.as_deref(), Some("tilewire"));
        assert_eq!(cli.group.as_deref(), Some("tilewire"));
    }

    #[test]
    fn print_config_flag_parses() {
        let cli =
            Cli::try_parse_from(["tilewire-server", "-c", "tilewire.conf", "--print-config"]).unwrap();
        assert!(cli.print_config);
    }

    #[test]
    fn help_contains_flags() {
        let result = Cli::try_parse_from(["tilewire-server", "--help"]);
        assert!(result.is_err());
        let help_text = result.unwrap_err().to_string();
        assert!(help_text.contains("--config"));
        assert!(help_text.contains("--print-config"));
        assert!(help_text.contains("-d"));
    }

    #[test]
    fn version_flag_parses() {
        let result = Cli::try_parse_from(["tilewire-server", "--version"]);
        assert!(result.is_err());
    }
}
