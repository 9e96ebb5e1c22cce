//! chargelink: OCPP 1.6J Central System.

use std::sync::Arc;

use tracing::{error, info, warn};

use chargelink::config::{default_config_path, AppConfig};
use chargelink::dispatch::Dispatcher;
use chargelink::domain::ChargerStateStore;
use chargelink::server::OcppServer;
use chargelink::session::SessionRegistry;
use chargelink::support::ShutdownSignal;
use chargelink::telemetry::{InfluxLineWriter, QueuedTelemetrySink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Configuration ──────────────────────────────────────────
    let config_path = std::env::var("CHARGELINK_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());

    let config = match AppConfig::load(&config_path) {
        Ok(config) => {
            init_tracing(&config.logging.level);
            info!("configuration loaded from {}", config_path.display());
            config
        }
        Err(e) => {
            let config = AppConfig::default();
            init_tracing(&config.logging.level);
            warn!("no usable config ({e}), running with defaults");
            config
        }
    };

    info!("starting chargelink Central System");

    // ── Metrics recorder (before the first counter fires) ──────
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");

    // ── Telemetry sink ─────────────────────────────────────────
    let influx = Arc::new(InfluxLineWriter::new(
        &config.influxdb.url,
        &config.influxdb.org,
        &config.influxdb.bucket,
        &config.influxdb.token,
    ));
    match influx.ping().await {
        Ok(()) => info!(url = config.influxdb.url.as_str(), "time-series store reachable"),
        Err(e) => warn!(
            url = config.influxdb.url.as_str(),
            error = %e,
            "time-series store unreachable, continuing degraded"
        ),
    }
    let (sink, writer_handle) = QueuedTelemetrySink::spawn(
        influx,
        config.telemetry.queue_capacity,
        config.telemetry.overflow,
    );

    // ── Protocol infrastructure ────────────────────────────────
    let registry = SessionRegistry::shared(config.ocpp.session_policy);
    let chargers = Arc::new(ChargerStateStore::new());
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        chargers,
        Arc::new(sink),
        config.dispatch_config(),
    ));

    let shutdown = ShutdownSignal::new();
    shutdown.listen_for_os_signals();

    let server = OcppServer::new(config.address(), registry, dispatcher, shutdown.clone());

    if let Err(e) = server.run().await {
        error!(error = %e, "OCPP server failed");
        shutdown.trigger();
        return Err(e.into());
    }

    // Connection tasks have been asked to stop; once the server and the
    // last connection task release their sink handles the writer drains and
    // exits. That await is the final flush.
    drop(server);
    info!("flushing telemetry");
    if let Err(e) = writer_handle.await {
        warn!(error = %e, "telemetry writer ended abnormally");
    }

    info!("chargelink shutdown complete");
    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}
