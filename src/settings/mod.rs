use dashmap::DashMap;
use serde::Serialize;

pub const AUTO_CREATE_COURIER_ORDER: &str = "auto_create_courier_order";
pub const DEFAULT_COURIER_ID: &str = "default_courier_id";

/// Operator-editable key/value settings. Read on every use, never cached, so
/// toggles take effect without a restart.
#[derive(Default)]
pub struct SettingsStore {
    values: DashMap<String, String>,
}

/// What the dispatch coordinator needs, captured once per invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchSettings {
    pub auto_create_courier_order: bool,
    pub default_courier_id: Option<i64>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.values.remove(key);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|raw| raw.trim().parse().ok())
    }

    pub fn all(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn dispatch_snapshot(&self) -> DispatchSettings {
        DispatchSettings {
            auto_create_courier_order: self.get_bool(AUTO_CREATE_COURIER_ORDER),
            default_courier_id: self.get_i64(DEFAULT_COURIER_ID),
        }
    }
}
