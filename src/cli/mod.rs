//! Command-line interface for the APS broker
//!
//! `serve` runs the HTTP broker (the default when no command is given);
//! `app-token` acquires a 2-legged token once and prints its expiry.

use crate::Result;
use crate::auth::build_gate;
use crate::config::Config;
use chrono::Utc;
use clap::{Arg, ArgMatches, Command};
use serde_json::json;
use std::path::PathBuf;

/// Main CLI entry point
pub async fn run() -> Result<()> {
    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("app-token", sub_matches)) => handle_app_token_command(sub_matches).await,
        Some(("serve", sub_matches)) => handle_serve_command(sub_matches).await,
        _ => handle_serve_command(&matches).await,
    }
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .value_parser(clap::value_parser!(PathBuf))
        .default_value(crate::constants::CONFIG_FILE_NAME)
        .help("Path to the JSON or YAML configuration file")
}

/// Build the command tree
pub fn build_cli() -> Command {
    Command::new("aps-broker")
        .about("OAuth2 token broker for Autodesk Platform Services")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(config_arg())
        .subcommand(
            Command::new("serve")
                .about("Start the HTTP broker")
                .arg(config_arg())
                .arg(Arg::new("host").long("host").help("Server host"))
                .arg(
                    Arg::new("port")
                        .long("port")
                        .short('p')
                        .value_parser(clap::value_parser!(u16))
                        .help("Server port"),
                ),
        )
        .subcommand(
            Command::new("app-token")
                .about("Acquire a 2-legged token and print its expiry (never the token)")
                .arg(config_arg()),
        )
}

/// Load configuration and apply `--host`/`--port` overrides
fn load_config(matches: &ArgMatches) -> Result<Config> {
    let path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(crate::constants::CONFIG_FILE_NAME));

    let mut config = Config::load_from_path(&path)?;
    apply_overrides(&mut config, matches);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut Config, matches: &ArgMatches) {
    if let Ok(Some(host)) = matches.try_get_one::<String>("host") {
        config.http.host = host.clone();
    }
    if let Ok(Some(port)) = matches.try_get_one::<u16>("port") {
        config.http.port = *port;
    }
}

async fn handle_serve_command(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    crate::init_logging(config.log.as_ref());
    crate::http::start_server(config).await
}

async fn handle_app_token_command(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    crate::init_logging(config.log.as_ref());

    let gate = build_gate(&config.provider)?;
    let record = gate.app_tokens().refresh().await?;
    let status = record.status(Utc::now());

    let output = json!({
        "scopes": config.provider.two_legged_scope_list(),
        "expires_at": status.expires_at.to_rfc3339(),
        "remaining_secs": status.remaining_secs,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
