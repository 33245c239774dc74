//! Cache Events
//!
//! Events emitted by the coordinator for monitoring and observability.

use serde::{Deserialize, Serialize};

/// Events emitted by the multi-layer cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CacheEvent {
    /// Value served by a layer
    Hit { key: String, layer: String },

    /// Not found in any layer
    Miss { key: String },

    /// Value copied into a faster layer after a hit further down
    Promoted {
        key: String,
        from_layer: String,
        to_layer: String,
    },

    /// Promotion write into a faster layer failed
    PromotionFailed {
        key: String,
        to_layer: String,
        error: String,
    },

    /// Write-through into a layer failed
    WriteFailed {
        key: String,
        layer: String,
        error: String,
    },

    /// All layers cleared
    Cleared,
}

impl CacheEvent {
    /// Get the key associated with this event (if any)
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Hit { key, .. }
            | CacheEvent::Miss { key }
            | CacheEvent::Promoted { key, .. }
            | CacheEvent::PromotionFailed { key, .. }
            | CacheEvent::WriteFailed { key, .. } => Some(key),
            CacheEvent::Cleared => None,
        }
    }

    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CacheEvent::PromotionFailed { .. } | CacheEvent::WriteFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let hit = CacheEvent::Hit {
            key: "images:cat.jpg".to_string(),
            layer: "memory".to_string(),
        };
        assert_eq!(hit.key(), Some("images:cat.jpg"));
        assert!(!hit.is_error());

        let failed = CacheEvent::WriteFailed {
            key: "images:cat.jpg".to_string(),
            layer: "remote".to_string(),
            error: "timeout".to_string(),
        };
        assert!(failed.is_error());
        assert_eq!(CacheEvent::Cleared.key(), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = CacheEvent::Promoted {
            key: "ns:k".to_string(),
            from_layer: "file".to_string(),
            to_layer: "memory".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "promoted");
        assert_eq!(json["from_layer"], "file");
    }
}
