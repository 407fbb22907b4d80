//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
///
/// Binding `:0` is supported; [`MetricsServer::addr`] reports the bound port.
pub async fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    let addr = listener
        .local_addr()
        .context("failed to read metrics listener address")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "gridsecd_starts_total",
            "Total number of times the gridsec daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "gridsecd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "gridsecd_build_info",
                "Build metadata and ingestion mode of the running daemon",
            ),
            &["version", "mode", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, mode: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, mode, profile])
            .set(1.0);
    }
}

/// Metrics recorded by the state-sync and scoring engine.
#[derive(Clone, Debug)]
pub struct EngineMetrics {
    ticks_total: IntCounter,
    tick_seconds: Histogram,
    attack_score: Gauge,
    calculated_bill: Gauge,
    link_connected: IntGauge,
    observers: IntGauge,
    notifications_sent: IntCounterVec,
    notifications_dropped: IntCounter,
    ingest_messages: IntCounterVec,
    ingest_errors: IntCounterVec,
    persistence_failures: IntCounterVec,
    outbound_failures: IntCounterVec,
    threats: IntCounterVec,
}

impl EngineMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let ticks_total = IntCounter::with_opts(Opts::new(
            "gridsec_ticks_total",
            "Number of completed engine ticks",
        ))?;
        registry.register(Box::new(ticks_total.clone()))?;

        let tick_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "gridsec_tick_duration_seconds",
                "Wall time spent applying one tick transition",
            )
            .buckets(prometheus::exponential_buckets(0.0001, 2.0, 14)?),
        )?;
        registry.register(Box::new(tick_seconds.clone()))?;

        let attack_score = Gauge::with_opts(Opts::new(
            "gridsec_attack_score",
            "Current attack score in [0, 100]",
        ))?;
        registry.register(Box::new(attack_score.clone()))?;

        let calculated_bill = Gauge::with_opts(Opts::new(
            "gridsec_calculated_bill",
            "Accumulated bill",
        ))?;
        registry.register(Box::new(calculated_bill.clone()))?;

        let link_connected = IntGauge::with_opts(Opts::new(
            "gridsec_link_connected",
            "Indicator (0/1) whether the hardware link is up",
        ))?;
        registry.register(Box::new(link_connected.clone()))?;

        let observers = IntGauge::with_opts(Opts::new(
            "gridsec_observers",
            "Number of currently subscribed observers",
        ))?;
        registry.register(Box::new(observers.clone()))?;

        let notifications_sent = IntCounterVec::new(
            Opts::new(
                "gridsec_notifications_sent_total",
                "Notifications published to observers by event name",
            ),
            &["event"],
        )?;
        registry.register(Box::new(notifications_sent.clone()))?;

        let notifications_dropped = IntCounter::with_opts(Opts::new(
            "gridsec_notifications_dropped_total",
            "Notifications skipped by observers that fell behind",
        ))?;
        registry.register(Box::new(notifications_dropped.clone()))?;

        let ingest_messages = IntCounterVec::new(
            Opts::new(
                "gridsec_ingest_messages_total",
                "Bus messages applied to state by topic",
            ),
            &["topic"],
        )?;
        registry.register(Box::new(ingest_messages.clone()))?;

        let ingest_errors = IntCounterVec::new(
            Opts::new(
                "gridsec_ingest_errors_total",
                "Bus messages rejected during decoding by topic",
            ),
            &["topic"],
        )?;
        registry.register(Box::new(ingest_errors.clone()))?;

        let persistence_failures = IntCounterVec::new(
            Opts::new(
                "gridsec_persistence_failures_total",
                "Record appends that failed and were skipped, by record kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(persistence_failures.clone()))?;

        let outbound_failures = IntCounterVec::new(
            Opts::new(
                "gridsec_outbound_failures_total",
                "Outbound publishes that failed, by payload kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(outbound_failures.clone()))?;

        let threats = IntCounterVec::new(
            Opts::new(
                "gridsec_threats_total",
                "Threat events scored, by severity",
            ),
            &["severity"],
        )?;
        registry.register(Box::new(threats.clone()))?;

        Ok(Self {
            ticks_total,
            tick_seconds,
            attack_score,
            calculated_bill,
            link_connected,
            observers,
            notifications_sent,
            notifications_dropped,
            ingest_messages,
            ingest_errors,
            persistence_failures,
            outbound_failures,
            threats,
        })
    }

    pub fn observe_tick(&self, seconds: f64, attack_score: f64, bill: f64) {
        self.ticks_total.inc();
        self.tick_seconds.observe(seconds);
        self.attack_score.set(attack_score);
        self.calculated_bill.set(bill);
    }

    pub fn set_link_connected(&self, connected: bool) {
        self.link_connected.set(i64::from(connected));
    }

    pub fn observer_joined(&self) {
        self.observers.inc();
    }

    pub fn observer_left(&self) {
        self.observers.dec();
    }

    pub fn record_notification(&self, event: &str) {
        self.notifications_sent.with_label_values(&[event]).inc();
    }

    pub fn record_dropped(&self, count: u64) {
        self.notifications_dropped.inc_by(count);
    }

    pub fn record_ingest(&self, topic: &str) {
        self.ingest_messages.with_label_values(&[topic]).inc();
    }

    pub fn record_ingest_error(&self, topic: &str) {
        self.ingest_errors.with_label_values(&[topic]).inc();
    }

    pub fn record_persistence_failure(&self, kind: &str) {
        self.persistence_failures.with_label_values(&[kind]).inc();
    }

    pub fn record_outbound_failure(&self, kind: &str) {
        self.outbound_failures.with_label_values(&[kind]).inc();
    }

    pub fn record_threat(&self, severity: &str) {
        self.threats.with_label_values(&[severity]).inc();
    }
}

/// Sum of every sample of a counter family, `0.0` when absent.
pub fn counter_total(registry: &Registry, name: &str) -> f64 {
    registry
        .gather()
        .iter()
        .find(|family| family.get_name() == name)
        .map(|family| {
            family
                .get_metric()
                .iter()
                .map(|metric| metric.get_counter().get_value())
                .sum()
        })
        .unwrap_or_default()
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_counters_are_registered_and_counted() {
        let registry = new_registry();
        let metrics = EngineMetrics::new(registry.clone()).unwrap();
        metrics.record_ingest_error("plant");
        metrics.record_ingest_error("plant");
        metrics.record_persistence_failure("history");
        metrics.record_dropped(3);
        metrics.observe_tick(0.001, 12.0, 4.5);

        assert_eq!(counter_total(&registry, "gridsec_ingest_errors_total"), 2.0);
        assert_eq!(counter_total(&registry, "gridsec_persistence_failures_total"), 1.0);
        assert_eq!(counter_total(&registry, "gridsec_notifications_dropped_total"), 3.0);
        assert_eq!(counter_total(&registry, "gridsec_ticks_total"), 1.0);
        assert_eq!(counter_total(&registry, "gridsec_missing_total"), 0.0);
    }

    #[test]
    fn registering_twice_on_one_registry_fails() {
        let registry = new_registry();
        EngineMetrics::new(registry.clone()).unwrap();
        assert!(EngineMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn exporter_serves_text_format() {
        let registry = new_registry();
        let daemon = DaemonMetrics::new(registry.clone()).unwrap();
        daemon.inc_start();
        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let body = reqwest::get(format!("http://{}/metrics", server.addr()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("gridsecd_starts_total 1"));
        server.shutdown().await.unwrap();
    }
}
