use config::{Config, ConfigError, Environment, File, FileFormat};
use edgebridge_gpio::GpioSettings;
use serde::Deserialize;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const ENV_PREFIX: &str = "EDGEBRIDGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Sim,
    Pigpio,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorSettings {
    pub trigger: u32,
    pub echo: u32,
    pub period_ms: u64,
    pub cycles: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchSettings {
    #[serde(default)]
    pub pins: Vec<u32>,
}

/// Behavior of the simulated engine; ignored on hardware.
#[derive(Debug, Clone, Deserialize)]
pub struct SimSettings {
    pub distance_m: f64,
    pub echo_delay_us: u32,
    pub toggle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineKind,
    #[serde(default)]
    pub gpio: GpioSettings,
    pub sensor: SensorSettings,
    #[serde(default)]
    pub watch: WatchSettings,
    pub sim: SimSettings,
}

/// Load `config/default.toml`, then apply `EDGEBRIDGE__SECTION__KEY`
/// environment overrides.
pub fn load_settings() -> Result<Settings, ConfigError> {
    info!("Attempting to load configuration from {}", DEFAULT_CONFIG_PATH);

    let settings = Config::builder()
        .add_source(File::new(DEFAULT_CONFIG_PATH, FileFormat::Toml).required(true))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(Config::try_deserialize::<Settings>);

    match settings {
        Ok(settings) => {
            info!("Successfully loaded configuration: {:?}", settings);
            Ok(settings)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e)
        }
    }
}
