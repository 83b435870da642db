use std::{collections::HashMap, fs};

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_bind: String,
    pub processing_delay_ms: u64,
    pub panorama_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8470".into(),
            processing_delay_ms: 2000,
            panorama_url: "/placeholder-360.jpg".into(),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        apply_file_overrides(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings);

    settings
}

fn apply_file_overrides(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.get("bind_addr") {
        settings.server_bind = v.clone();
    }
    if let Some(v) = file_cfg.get("processing_delay_ms") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.processing_delay_ms = parsed;
        }
    }
    if let Some(v) = file_cfg.get("panorama_url") {
        settings.panorama_url = v.clone();
    }
}

fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(v) = std::env::var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Ok(v) = std::env::var("APP__PROCESSING_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.processing_delay_ms = parsed;
        }
    }

    if let Ok(v) = std::env::var("APP__PANORAMA_URL") {
        settings.panorama_url = v;
    }
}
