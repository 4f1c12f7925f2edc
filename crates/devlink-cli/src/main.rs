//! # devlink CLI
//!
//! Directory queries for debugging a deployment, and the counter
//! reference service.

use anyhow::{Context, Result};
use devlink_directory::{DirectoryClient, DirectoryClientConfig};
use devlink_service::{ManagedService, ServiceConfig};
use serde::Serialize;
use std::env;
use tracing_subscriber::EnvFilter;

mod counter;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match args[1].as_str() {
        "health" => {
            let status = directory()?.health_check().await.context("Health check failed")?;
            print_json(&status)?;
        }
        "service" => {
            let id = required(&args, "service <service-id>");
            let node = directory()?.service_info(id).await.context("Failed to fetch service")?;
            print_json(&node)?;
        }
        "devices" => {
            let id = required(&args, "devices <service-id>");
            let devices = directory()?
                .linked_devices(id)
                .await
                .context("Failed to fetch linked devices")?;
            print_json(&devices)?;
        }
        "device" => {
            let id = required(&args, "device <device-id>");
            let node = directory()?.device_info(id).await.context("Failed to fetch device")?;
            print_json(&node)?;
        }
        "counter" => run_counter().await?,
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn run_counter() -> Result<()> {
    let mut config = ServiceConfig::from_env()?;
    config
        .runtime
        .disconnect_status
        .get_or_insert_with(|| "Unexpected disconnect!".to_string());
    config
        .runtime
        .shutdown_status
        .get_or_insert_with(|| "Shutting down".to_string());

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        service_id = %config.service_id,
        "Starting counter service"
    );

    let service = ManagedService::connect(&config, counter::Counter::default).await?;
    service.set_status("Started").context("Failed to publish service status")?;

    service.run_until_shutdown().await.disconnect().await;

    Ok(())
}

/// Directory client from `DEVLINK_FRAMEWORK_URL`, authenticated with
/// `DEVLINK_SERVICE_ID`/`DEVLINK_SERVICE_TOKEN` when set.
fn directory() -> Result<DirectoryClient> {
    let mut config = DirectoryClientConfig::default();
    if let Ok(url) = env::var("DEVLINK_FRAMEWORK_URL") {
        config.base_url = url;
    }
    if let Ok(id) = env::var("DEVLINK_SERVICE_ID") {
        config.username = Some(id);
        config.password = env::var("DEVLINK_SERVICE_TOKEN").ok();
    }
    DirectoryClient::new(config).context("Failed to create directory client")
}

fn required<'a>(args: &'a [String], usage: &str) -> &'a str {
    if let Some(arg) = args.get(2) {
        return arg;
    }
    eprintln!("Usage: devlink {usage}");
    std::process::exit(1);
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{json}");
    Ok(())
}

fn print_help() {
    println!(
        r#"devlink CLI

USAGE:
    devlink <COMMAND> [OPTIONS]

COMMANDS:
    health                  Check the directory server's health
    service <service-id>    Show a service's description
    devices <service-id>    List the devices linked to a service, with config
    device <device-id>      Show a device's description
    counter                 Run the raw traffic counter service
    help                    Show this help message

ENVIRONMENT:
    DEVLINK_FRAMEWORK_URL   Directory server URL (default: http://localhost:7000)
    DEVLINK_MQTT_BROKER     MQTT broker URL (default: tcp://localhost:1883)
    DEVLINK_SERVICE_ID      Service identifier
    DEVLINK_SERVICE_TOKEN   Service token
    RUST_LOG                Log filter (default: info)

EXAMPLES:
    devlink devices 5a1ea73df76abe01c57abfb8
    DEVLINK_SERVICE_ID=5a1ea73df76abe01c57abfb8 DEVLINK_SERVICE_TOKEN=... devlink counter
"#
    );
}
