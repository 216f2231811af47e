// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The agent binary: load configuration and the device model, start the
//! adapters, serve HTTP until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use mtconnect_agent::agent::Agent;
use mtconnect_agent::config::AgentSettings;
use mtconnect_agent::http::files::FileRegistry;
use mtconnect_agent::http::{self, HttpState};
use mtconnect_agent::model_file;
use mtconnect_shdr::adapter::AdapterOptionsBuilder;
use mtconnect_shdr::connector::ConnectorOptionsBuilder;

/// MTConnect agent.
#[derive(Debug, Parser)]
#[command(name = "mtconnect-agent", version, about)]
struct Cli {
    /// Path to the agent configuration file.
    #[arg(default_value = "agent.toml")]
    config: PathBuf,

    /// Override the configured HTTP port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the configured device model file.
    #[arg(long)]
    devices: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut settings = match AgentSettings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(devices) = cli.devices {
        settings.devices = devices;
    }

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: AgentSettings) -> Result<(), Box<dyn std::error::Error>> {
    let devices = model_file::load(&settings.devices)?;
    let agent = Agent::new(
        devices,
        settings.buffer_size,
        settings.checkpoint_frequency,
        settings.max_assets,
    )?;

    for adapter in &settings.adapters {
        let device = adapter
            .device
            .clone()
            .unwrap_or_else(|| agent.model().first_device().name().to_string());
        let connector_options = ConnectorOptionsBuilder::default()
            .host(adapter.host.clone())
            .port(adapter.port)
            .legacy_timeout(Duration::from_secs(
                adapter.legacy_timeout.unwrap_or(settings.legacy_timeout),
            ))
            .reconnect_interval(Duration::from_millis(
                adapter
                    .reconnect_interval
                    .unwrap_or(settings.reconnect_interval),
            ))
            .build()?;
        let adapter_options = AdapterOptionsBuilder::default()
            .device(device)
            .additional_devices(adapter.additional_devices.clone())
            .filter_duplicates(adapter.filter_duplicates)
            .auto_available(adapter.auto_available)
            .ignore_timestamps(
                adapter.ignore_timestamps.unwrap_or(settings.ignore_timestamps),
            )
            .conversion_required(
                adapter
                    .conversion_required
                    .unwrap_or(settings.conversion_required),
            )
            .relative_time(adapter.relative_time)
            .upcase_values(
                adapter
                    .upcase_data_item_value
                    .unwrap_or(settings.upcase_data_item_value),
            )
            .build()?;
        agent.start_adapter(
            connector_options,
            adapter_options,
            adapter.preserve_uuid.unwrap_or(settings.preserve_uuid),
        );
    }

    let mut files = FileRegistry::new();
    for file in &settings.files {
        files.register(&file.uri, &file.path);
    }

    let state = Arc::new(HttpState {
        agent: agent.clone(),
        put_enabled: settings.allow_put,
        put_allowed_hosts: settings.put_allowed_hosts(),
        files,
    });

    let bind = format!(
        "{}:{}",
        settings.server_ip.as_deref().unwrap_or("0.0.0.0"),
        settings.port
    );
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    log::info!("agent listening on {bind}");

    let app = http::router(state)
        .into_make_service_with_connect_info::<std::net::SocketAddr>();
    let server = axum::serve(listener, app);

    tokio::select! {
        result = async { server.await } => result?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupt received, shutting down");
        }
    }

    agent.shutdown();
    Ok(())
}
