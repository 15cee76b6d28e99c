use super::HubConfig;
use tracing::warn;

pub(super) const CONFIG_PATH_VAR: &str = "SENSORHUB_CONFIG";

impl HubConfig {
    /// Apply `SENSORHUB_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source. Unparsable values are
    /// logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SENSORHUB_DATABASE_PATH") {
            self.storage.database_path = v;
        }
        if let Some(v) = lookup("SENSORHUB_BIND_ADDRESS") {
            self.api.bind_address = v;
        }
        if let Some(n) = parse_var(&lookup, "SENSORHUB_REMINDER_DUE_MS") {
            self.building.reminder_due_ms = n;
        }
        if let Some(n) = parse_var(&lookup, "SENSORHUB_REMINDER_PERIOD_MS") {
            self.building.reminder_period_ms = n;
        }
        if let Some(n) = parse_var(&lookup, "SENSORHUB_MAX_READINGS") {
            self.sensor.max_readings = n;
        }
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
