use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use tracing::warn;

pub const DEFAULT_SETTINGS_FILE: &str = "console.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub database_url: String,
    pub operator_id: Option<String>,
    /// Skips the operator lookup when set.
    pub tenant_id: Option<String>,
    pub gateway_cache_path: PathBuf,
    pub preview_cache_path: PathBuf,
    pub connect_max_attempts: u32,
    pub subscribe_delay: Duration,
    pub reconnect_delay: Duration,
    pub selection_pin_interval: Duration,
    pub avatar_refresh_interval: Duration,
    pub connection_refresh_interval: Duration,
    pub history_poll_interval: Duration,
    pub history_limit: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/console.db".into(),
            operator_id: None,
            tenant_id: None,
            gateway_cache_path: "./data/gateway.json".into(),
            preview_cache_path: "./data/previews.json".into(),
            connect_max_attempts: 3,
            subscribe_delay: Duration::from_millis(1000),
            reconnect_delay: Duration::from_secs(5),
            selection_pin_interval: Duration::from_secs(2),
            avatar_refresh_interval: Duration::from_secs(300),
            connection_refresh_interval: Duration::from_secs(30),
            history_poll_interval: Duration::from_secs(60),
            history_limit: 50,
        }
    }
}

/// Defaults, then `console.toml`, then the environment.
pub fn load_settings() -> EngineSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE))
}

pub fn load_settings_from(path: &Path) -> EngineSettings {
    let mut settings = EngineSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<toml::Table>(&raw) {
            Ok(table) => {
                let values = table
                    .into_iter()
                    .map(|(key, value)| {
                        let value = match value {
                            toml::Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (key, value)
                    })
                    .collect::<HashMap<_, _>>();
                apply_overrides(&mut settings, |key| values.get(key).cloned());
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "config: ignoring unreadable settings file");
            }
        }
    }

    apply_overrides(&mut settings, env_lookup);
    settings
}

/// `CONSOLE_<KEY>` wins over the bare key name; `APP__<KEY>` wins over both.
fn env_lookup(key: &str) -> Option<String> {
    let upper = key.to_ascii_uppercase();
    std::env::var(format!("APP__{upper}"))
        .or_else(|_| std::env::var(format!("CONSOLE_{upper}")))
        .ok()
}

pub(crate) fn apply_overrides(
    settings: &mut EngineSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(v) = lookup("database_url") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("operator_id").filter(|v| !v.trim().is_empty()) {
        settings.operator_id = Some(v);
    }
    if let Some(v) = lookup("tenant_id").filter(|v| !v.trim().is_empty()) {
        settings.tenant_id = Some(v);
    }
    if let Some(v) = lookup("gateway_cache_path") {
        settings.gateway_cache_path = v.into();
    }
    if let Some(v) = lookup("preview_cache_path") {
        settings.preview_cache_path = v.into();
    }
    if let Some(v) = parsed::<u32>(&lookup, "connect_max_attempts") {
        settings.connect_max_attempts = v.max(1);
    }
    if let Some(v) = parsed::<u32>(&lookup, "history_limit") {
        settings.history_limit = v;
    }

    let millis = |key: &str| parsed::<u64>(&lookup, key).map(Duration::from_millis);
    if let Some(v) = millis("subscribe_delay_ms") {
        settings.subscribe_delay = v;
    }
    if let Some(v) = millis("reconnect_delay_ms") {
        settings.reconnect_delay = v;
    }
    if let Some(v) = millis("selection_pin_interval_ms") {
        settings.selection_pin_interval = v;
    }
    if let Some(v) = millis("avatar_refresh_interval_ms") {
        settings.avatar_refresh_interval = v;
    }
    if let Some(v) = millis("connection_refresh_interval_ms") {
        settings.connection_refresh_interval = v;
    }
    if let Some(v) = millis("history_poll_interval_ms") {
        settings.history_poll_interval = v;
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "config: ignoring unparsable value");
            None
        }
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return EngineSettings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_plain_file_path_to_sqlite_url() {
        assert_eq!(
            normalize_database_url("./data/test.db"),
            "sqlite://./data/test.db"
        );
        assert_eq!(
            normalize_database_url("sqlite:C:\\data\\test.db"),
            "sqlite://C:/data/test.db"
        );
        assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[test]
    fn prepare_creates_parent_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("console.db");

        prepare_database_url(&db_path.to_string_lossy()).expect("prepare db url");
        assert!(dir.path().join("nested").exists());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("console.toml");
        fs::write(
            &path,
            r#"
            database_url = "sqlite://./tmp/ops.db"
            operator_id = "op-7"
            connect_max_attempts = 5
            subscribe_delay_ms = "250"
            "#,
        )
        .expect("write");

        let settings = load_settings_from(&path);
        assert_eq!(settings.database_url, "sqlite://./tmp/ops.db");
        assert_eq!(settings.operator_id.as_deref(), Some("op-7"));
        assert_eq!(settings.connect_max_attempts, 5);
        assert_eq!(settings.subscribe_delay, Duration::from_millis(250));
        assert_eq!(settings.history_limit, 50);
    }

    #[test]
    fn unparsable_values_keep_defaults() {
        let mut settings = EngineSettings::default();
        let values: HashMap<&str, &str> =
            HashMap::from([("history_limit", "many"), ("connect_max_attempts", "0")]);
        apply_overrides(&mut settings, |key| values.get(key).map(|v| v.to_string()));

        assert_eq!(settings.history_limit, 50);
        assert_eq!(settings.connect_max_attempts, 1);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings_from(Path::new("/nonexistent/console.toml"));
        assert_eq!(settings.connect_max_attempts, EngineSettings::default().connect_max_attempts);
    }
}
