use crate::application::polling_controller::ControllerSettings;
use crate::domain::metrics::FetchParameters;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub gateway: GatewaySettings,
    pub panel: PanelSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewaySettings {
    pub base_url: String,
    pub token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PanelSettings {
    pub instance_id: String,
    pub time_window_minutes: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub fetch_timeout_ms: u64,
}

impl PanelSettings {
    pub fn initial_parameters(&self) -> FetchParameters {
        FetchParameters::new(self.instance_id.clone(), self.time_window_minutes)
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
        }
    }
}

/// Load `config/panel.*` (optional) with `PANEL_SECTION__KEY` overrides.
pub fn load_app_config() -> anyhow::Result<AppConfig> {
    build_app_config(
        config::File::with_name("config/panel").required(false),
        env_source(),
    )
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix("PANEL")
        .prefix_separator("_")
        .separator("__")
}

fn build_app_config<F, E>(file: F, env: E) -> anyhow::Result<AppConfig>
where
    F: config::Source + Send + Sync + 'static,
    E: config::Source + Send + Sync + 'static,
{
    let settings = config::Config::builder()
        .set_default("server.bind", "0.0.0.0:8080")?
        .set_default("gateway.base_url", "http://localhost:8000")?
        .set_default("gateway.token", "")?
        .set_default("panel.instance_id", "kafka-1")?
        .set_default("panel.time_window_minutes", 60)?
        .set_default("panel.max_retries", 3)?
        .set_default("panel.retry_delay_ms", 1000)?
        .set_default("panel.fetch_timeout_ms", 30_000)?
        .add_source(file)
        .add_source(env)
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    if config.panel.time_window_minutes == 0 {
        anyhow::bail!("panel.time_window_minutes must be greater than zero");
    }
    if config.panel.fetch_timeout_ms == 0 {
        anyhow::bail!("panel.fetch_timeout_ms must be greater than zero");
    }
    Ok(config)
}
