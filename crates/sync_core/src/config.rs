use std::{collections::HashMap, fs, path::Path, time::Duration};

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
        }
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new("chat.toml"))
}

pub fn load_settings_from(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("server_url") {
                settings.server_url = v.clone();
            }
            if let Some(v) = file_cfg.get("reconnect_attempts") {
                if let Ok(parsed) = v.parse::<u32>() {
                    settings.reconnect_attempts = parsed;
                }
            }
            if let Some(v) = file_cfg.get("reconnect_delay_ms") {
                if let Ok(parsed) = v.parse::<u64>() {
                    settings.reconnect_delay = Duration::from_millis(parsed);
                }
            }
        }
    }

    if let Ok(v) = std::env::var("SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Ok(v) = std::env::var("APP__RECONNECT_ATTEMPTS") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.reconnect_attempts = parsed;
        }
    }

    if let Ok(v) = std::env::var("APP__RECONNECT_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.reconnect_delay = Duration::from_millis(parsed);
        }
    }

    settings
}
