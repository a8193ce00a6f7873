use crate::world::events::{EventBus, SubscriptionId};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

/// A runtime configuration value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric value; integers widen
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Int(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::String(value) => write!(f, "\"{}\"", value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChanged {
    pub section: String,
    pub key: String,
    pub value: ConfigValue,
}

impl ConfigChanged {
    pub fn is(&self, section: &str, key: &str) -> bool {
        self.section == section && self.key == key
    }
}

/// Runtime settings addressed by `(section, key)`, case-insensitive
#[derive(Debug, Default)]
pub struct ConfigService {
    values: RefCell<BTreeMap<(String, String), ConfigValue>>,
    changes: EventBus<ConfigChanged>,
}

fn normalize(section: &str, key: &str) -> (String, String) {
    (section.to_lowercase(), key.to_lowercase())
}

impl ConfigService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<ConfigValue> {
        self.values.borrow().get(&normalize(section, key)).cloned()
    }

    /// Store a value, notifying subscribers when it differs from the current one
    pub fn set(&self, section: &str, key: &str, value: impl Into<ConfigValue>) {
        let value = value.into();
        let (section, key) = normalize(section, key);
        let previous = self
            .values
            .borrow_mut()
            .insert((section.clone(), key.clone()), value.clone());
        if previous.as_ref() == Some(&value) {
            return;
        }
        tracing::debug!("Config {}.{} = {}", section, key, value);
        self.changes.emit(&ConfigChanged { section, key, value });
    }

    pub fn subscribe(&self, callback: impl Fn(&ConfigChanged) + 'static) -> SubscriptionId {
        self.changes.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.changes.unsubscribe(id)
    }
}
