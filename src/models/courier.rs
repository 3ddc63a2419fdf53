use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CourierProvider {
    Pathao,
    Steadfast,
    Internal,
}

impl CourierProvider {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "pathao" => Some(CourierProvider::Pathao),
            "steadfast" => Some(CourierProvider::Steadfast),
            "internal" => Some(CourierProvider::Internal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CourierProvider::Pathao => "pathao",
            CourierProvider::Steadfast => "steadfast",
            CourierProvider::Internal => "internal",
        }
    }

    pub fn courier_type(&self) -> CourierType {
        match self {
            CourierProvider::Internal => CourierType::Internal,
            _ => CourierType::External,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CourierType {
    External,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: i64,
    pub name: String,
    pub provider: CourierProvider,
    pub courier_type: CourierType,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}
