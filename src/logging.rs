// SPDX-License-Identifier: Apache-2.0
use tracing::subscriber::{set_global_default, SetGlobalDefaultError};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter, Registry};

use crate::config::{GateConfig, LogFormat};

/// Build the filter: `RUST_LOG` wins, otherwise the configured level applies
/// to this crate and to actix.
fn env_filter(name: &str, level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let target = name.replace('-', "_");
        EnvFilter::new(format!("{level},{target}={level},actix_web={level}"))
    })
}

/// Initialize the tracing subscriber for the application (Bunyan JSON output)
pub fn init_tracing<Sink>(name: &str, level: &str, sink: Sink) -> Result<(), SetGlobalDefaultError>
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    // Skip setting LogTracer if it's already been set
    let _ = LogTracer::init();

    let formatting_layer = BunyanFormattingLayer::new(name.into(), sink);

    let subscriber = Registry::default()
        .with(env_filter(name, level))
        .with(JsonStorageLayer)
        .with(formatting_layer);

    set_global_default(subscriber)?;
    tracing::info!("Tracing initialized with Bunyan formatter");
    Ok(())
}

/// Initialize a more readable console logger for development
pub fn init_console_tracing(name: &str, level: &str) -> Result<(), SetGlobalDefaultError> {
    let _ = LogTracer::init();

    let subscriber = tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(env_filter(name, level))
        .finish();

    set_global_default(subscriber)?;
    tracing::info!("Console tracing initialized");
    Ok(())
}

/// Pick the subscriber matching the configured log format
pub fn init_from_config(name: &str, config: &GateConfig) -> Result<(), SetGlobalDefaultError> {
    match config.log_format {
        LogFormat::Json => init_tracing(name, &config.log_level, std::io::stdout),
        LogFormat::Pretty => init_console_tracing(name, &config.log_level),
    }
}
