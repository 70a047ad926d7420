//! Engine configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Default cap on raw events one multiplexer drains per pump pass.
pub const DEFAULT_MAX_EVENTS_PER_PUMP: usize = 1024;

/// Process-level engine settings.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Selector joins open their own-collection feed pinned in keep-running
    /// mode, so rapid subscribe/unsubscribe does not start and stop the feed.
    pub pin_selector_feeds: bool,
    /// Collections whose feeds are pinned as soon as the engine starts.
    pub keep_running: Vec<String>,
    /// Upper bound on raw events one multiplexer drains per pump pass.
    pub max_events_per_pump: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pin_selector_feeds: true,
            keep_running: Vec::new(),
            max_events_per_pump: DEFAULT_MAX_EVENTS_PER_PUMP,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets whether selector joins pin their feeds.
    pub fn pin_selector_feeds(mut self, pin: bool) -> Self {
        self.pin_selector_feeds = pin;
        self
    }

    /// Adds a collection to pin at startup.
    pub fn keep_running(mut self, collection: impl Into<String>) -> Self {
        self.keep_running.push(collection.into());
        self
    }

    /// Sets the per-pump event cap. Zero is treated as one.
    pub fn max_events_per_pump(mut self, max: usize) -> Self {
        self.max_events_per_pump = max.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.pin_selector_feeds);
        assert!(config.keep_running.is_empty());
        assert_eq!(config.max_events_per_pump, DEFAULT_MAX_EVENTS_PER_PUMP);
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(r#"{"keep_running": ["users"]}"#).unwrap();
        assert_eq!(config.keep_running, vec!["users".to_string()]);
        assert!(config.pin_selector_feeds);
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        assert!(EngineConfig::from_json(r#"{"keepRunning": []}"#).is_err());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::default()
            .pin_selector_feeds(false)
            .keep_running("posts")
            .max_events_per_pump(0);
        assert!(!config.pin_selector_feeds);
        assert_eq!(config.keep_running, vec!["posts".to_string()]);
        assert_eq!(config.max_events_per_pump, 1);
    }
}
