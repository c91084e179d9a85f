// Analytics sink interface (fire-and-forget metadata pass-through)

use crate::engine::MediaEngine;
use std::collections::BTreeMap;

/// Value in a flat analytics record
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsValue {
    Text(String),
    Number(f64),
}

impl From<&str> for AnalyticsValue {
    fn from(value: &str) -> Self {
        AnalyticsValue::Text(value.to_string())
    }
}

impl From<String> for AnalyticsValue {
    fn from(value: String) -> Self {
        AnalyticsValue::Text(value)
    }
}

impl From<f64> for AnalyticsValue {
    fn from(value: f64) -> Self {
        AnalyticsValue::Number(value)
    }
}

/// Flat key/value metadata (player name, environment key, video id, title,
/// duration, custom fields)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsRecord {
    fields: BTreeMap<String, AnalyticsValue>,
}

impl AnalyticsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<AnalyticsValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AnalyticsValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AnalyticsValue> {
        self.fields.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AnalyticsValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// External analytics collaborator. Invoked at most once per session; the
/// return value is never consumed.
pub trait AnalyticsSink: Send + Sync {
    fn report(&self, audio_id: &str, engine: &dyn MediaEngine, record: &AnalyticsRecord);
}
