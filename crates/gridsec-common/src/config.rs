//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_mode() -> Mode {
    Mode::Simulation
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_decay_step() -> f64 {
    0.5
}

fn default_baseline_price_rate() -> f64 {
    0.25
}

fn default_attack_price_rate() -> f64 {
    50.0
}

fn default_attack_score_boost() -> f64 {
    60.0
}

fn default_billing_tick_fraction() -> f64 {
    0.05
}

fn default_sample_probability() -> f64 {
    0.1
}

fn default_threat_probability() -> f64 {
    0.01
}

fn default_threat_intel_probability() -> f64 {
    0.3
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_simulator_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_mqtt_host() -> String {
    "broker.hivemq.com".to_owned()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_client_id() -> String {
    "gridsecd".to_owned()
}

fn default_topic_root() -> String {
    "fyp_grid_99".to_owned()
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_reconnect_delay() -> Duration {
    Duration::from_millis(2000)
}

fn default_persistence_directory() -> PathBuf {
    PathBuf::from("target/gridsec-data")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9898"
        .parse()
        .expect("valid default metrics address")
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    "0.0.0.0:5000".parse().expect("valid default api address")
}

fn default_history_window() -> Duration {
    Duration::from_secs(3600)
}

fn default_log_limit() -> usize {
    50
}

/// Primary configuration object for the gridsec runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "GRIDSEC_CONFIG";

    /// Load configuration from disk, respecting the `GRIDSEC_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.simulator.validate()?;
        self.mqtt.validate()?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            engine: EngineConfig::default(),
            simulator: SimulatorConfig::default(),
            mqtt: MqttConfig::default(),
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Selects which telemetry source owns the measurement fields.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Live plant/meter data from the message bus.
    Hardware,
    /// Synthetic random-walk generator, no transport required.
    #[default]
    Simulation,
}

impl Mode {
    pub fn is_simulation(&self) -> bool {
        matches!(self, Mode::Simulation)
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, Mode::Hardware)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Hardware => "hardware",
            Mode::Simulation => "simulation",
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hardware" => Ok(Mode::Hardware),
            "simulation" => Ok(Mode::Simulation),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Tick loop, scoring, billing and sampling parameters.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_tick_interval", rename = "tick_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub tick_interval: Duration,
    /// Points removed from the attack score on every tick.
    #[serde(default = "default_decay_step")]
    pub decay_step: f64,
    #[serde(default = "default_baseline_price_rate")]
    pub baseline_price_rate: f64,
    /// Price rate forced by the `simulate_attack` control action.
    #[serde(default = "default_attack_price_rate")]
    pub attack_price_rate: f64,
    #[serde(default = "default_attack_score_boost")]
    pub attack_score_boost: f64,
    /// Fraction of an hour billed per tick.
    #[serde(default = "default_billing_tick_fraction")]
    pub billing_tick_fraction: f64,
    #[serde(default = "default_sample_probability")]
    pub sample_probability: f64,
    #[serde(default = "default_threat_probability")]
    pub threat_probability: f64,
    #[serde(default = "default_threat_intel_probability")]
    pub threat_intel_probability: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            decay_step: default_decay_step(),
            baseline_price_rate: default_baseline_price_rate(),
            attack_price_rate: default_attack_price_rate(),
            attack_score_boost: default_attack_score_boost(),
            billing_tick_fraction: default_billing_tick_fraction(),
            sample_probability: default_sample_probability(),
            threat_probability: default_threat_probability(),
            threat_intel_probability: default_threat_intel_probability(),
            seed: None,
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(anyhow!("engine tick_interval_ms must be greater than zero"));
        }
        if !(0.5..=1.0).contains(&self.decay_step) {
            return Err(anyhow!(
                "engine decay_step {} must lie within [0.5, 1.0]",
                self.decay_step
            ));
        }
        for (name, value) in [
            ("sample_probability", self.sample_probability),
            ("threat_probability", self.threat_probability),
            ("threat_intel_probability", self.threat_intel_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("engine {name} {value} must lie within [0, 1]"));
            }
        }
        if self.baseline_price_rate < 0.0 || self.attack_price_rate < 0.0 {
            return Err(anyhow!("engine price rates must not be negative"));
        }
        if self.billing_tick_fraction < 0.0 {
            return Err(anyhow!("engine billing_tick_fraction must not be negative"));
        }
        if self.broadcast_capacity == 0 {
            return Err(anyhow!("engine broadcast_capacity must be greater than zero"));
        }
        Ok(())
    }
}

/// Inclusive physical range used to clamp simulated measurements.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Random-walk parameters for one simulated measurement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WalkConfig {
    pub initial: f64,
    /// Largest absolute change applied per step.
    pub max_delta: f64,
    pub bounds: Bounds,
}

impl WalkConfig {
    const fn new(initial: f64, max_delta: f64, min: f64, max: f64) -> Self {
        Self {
            initial,
            max_delta,
            bounds: Bounds::new(min, max),
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.bounds.min.is_nan() || self.bounds.max.is_nan() {
            return Err(anyhow!("simulator {name} bounds must be numbers"));
        }
        if self.bounds.min > self.bounds.max {
            return Err(anyhow!(
                "simulator {name} bounds are inverted ({} > {})",
                self.bounds.min,
                self.bounds.max
            ));
        }
        if !self.max_delta.is_finite() || self.max_delta < 0.0 {
            return Err(anyhow!(
                "simulator {name} max_delta must be finite and not negative"
            ));
        }
        if !self.bounds.contains(self.initial) {
            return Err(anyhow!("simulator {name} initial value lies outside its bounds"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_simulator_interval", rename = "interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "SimulatorConfig::default_generation")]
    pub generation: WalkConfig,
    #[serde(default = "SimulatorConfig::default_load")]
    pub load: WalkConfig,
    #[serde(default = "SimulatorConfig::default_voltage")]
    pub voltage: WalkConfig,
    #[serde(default = "SimulatorConfig::default_frequency")]
    pub frequency: WalkConfig,
    #[serde(default = "SimulatorConfig::default_speed")]
    pub speed: WalkConfig,
}

impl SimulatorConfig {
    fn default_generation() -> WalkConfig {
        WalkConfig::new(500.0, 5.0, 0.0, 1000.0)
    }

    fn default_load() -> WalkConfig {
        WalkConfig::new(400.0, 5.0, 0.0, 1000.0)
    }

    fn default_voltage() -> WalkConfig {
        WalkConfig::new(230.0, 0.5, 200.0, 250.0)
    }

    fn default_frequency() -> WalkConfig {
        WalkConfig::new(50.0, 0.02, 49.5, 50.5)
    }

    fn default_speed() -> WalkConfig {
        WalkConfig::new(3000.0, 10.0, 0.0, 3600.0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("simulator interval_ms must be greater than zero"));
        }
        self.generation.validate("generation")?;
        self.load.validate("load")?;
        self.voltage.validate("voltage")?;
        self.frequency.validate("frequency")?;
        self.speed.validate("speed")?;
        Ok(())
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            interval: default_simulator_interval(),
            generation: Self::default_generation(),
            load: Self::default_load(),
            voltage: Self::default_voltage(),
            frequency: Self::default_frequency(),
            speed: Self::default_speed(),
        }
    }
}

/// Message-bus connection settings for the hardware link.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic_root")]
    pub topic_root: String,
    #[serde(default = "default_keep_alive", rename = "keep_alive_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub keep_alive: Duration,
    #[serde(default = "default_reconnect_delay", rename = "reconnect_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_delay: Duration,
}

impl MqttConfig {
    /// Wildcard subscription covering every hardware topic.
    pub fn subscription(&self) -> String {
        format!("{}/#", self.topic_root)
    }

    pub fn control_topic(&self) -> String {
        format!("{}/grid/control", self.topic_root)
    }

    pub fn bill_topic(&self) -> String {
        format!("{}/meter/bill", self.topic_root)
    }

    pub fn validate(&self) -> Result<()> {
        if self.topic_root.trim().is_empty() {
            return Err(anyhow!("mqtt topic_root must not be empty"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("mqtt host must not be empty"));
        }
        Ok(())
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_mqtt_client_id(),
            topic_root: default_topic_root(),
            keep_alive: default_keep_alive(),
            reconnect_delay: default_reconnect_delay(),
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    #[default]
    Journal,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_persistence_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub backend: PersistenceBackend,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            directory: default_persistence_directory(),
            backend: PersistenceBackend::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
    #[serde(
        default = "default_history_window",
        rename = "default_history_window_secs"
    )]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub default_history_window: Duration,
    #[serde(default = "default_log_limit")]
    pub default_log_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
            default_history_window: default_history_window(),
            default_log_limit: default_log_limit(),
        }
    }
}
