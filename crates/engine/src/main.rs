use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;

use pv_domain::config::ObservabilityConfig;
use pv_engine::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Run {
            message,
            session,
            model,
            json,
        }) => {
            let (config, _) = pv_engine::cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            let result =
                pv_engine::cli::run::run(Arc::new(config), message, session, model, json).await;
            shutdown_tracing(tracer_provider);
            result
        }
        None => {
            let (config, _) = pv_engine::cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            let result = pv_engine::cli::chat::chat(Arc::new(config), None, None).await;
            shutdown_tracing(tracer_provider);
            result
        }
        Some(Command::Chat { session, model }) => {
            let (config, _) = pv_engine::cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            let result = pv_engine::cli::chat::chat(Arc::new(config), session, model).await;
            shutdown_tracing(tracer_provider);
            result
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = pv_engine::cli::load_config()?;
            let valid = pv_engine::cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = pv_engine::cli::load_config()?;
            pv_engine::cli::config::show(&config)
        }
        Some(Command::Version) => {
            println!("palaver {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize tracing on stderr so stdout carries only the response.
///
/// Without an OTLP endpoint the output is compact text at `warn`.  When
/// `otlp_endpoint` is configured, records switch to JSON and every
/// `tracing` span is also exported as an OTel span via OTLP/gRPC.  The
/// returned [`SdkTracerProvider`] handle must be shut down on exit to
/// flush pending spans.
///
/// [`SdkTracerProvider`]: opentelemetry_sdk::trace::SdkTracerProvider
fn init_tracing(obs: &ObservabilityConfig) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let Some(endpoint) = obs.otlp_endpoint.as_ref().filter(|_| obs.exports_traces()) else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .compact()
            .init();
        return None;
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pv_engine=debug"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr);

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(e) => e,
        Err(e) => {
            eprintln!(
                "WARNING: failed to create OTLP exporter for {endpoint}: {e}; \
                 continuing without OpenTelemetry"
            );
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
            return None;
        }
    };

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(obs.service_name.clone())
        .build();

    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
            obs.sample_rate,
        ))
        .with_resource(resource)
        .build();

    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("palaver"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    Some(tracer_provider)
}

fn shutdown_tracing(provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>) {
    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = ?e, "OpenTelemetry tracer provider shutdown failed");
        }
    }
}
