use kiosk_core::{DEFAULT_BRANCH, DEFAULT_MAX_BACKUPS, DEFAULT_UPDATE_SCHEDULE};
use serde_json::{json, Map, Value};

pub const OTA_SECTION: &str = "ota";

pub fn default_document() -> Value {
    json!({
        "device": {
            "name": "Pi Analytics Dashboard",
            "location": "Office",
            "timezone": "UTC",
            "last_configured": null
        },
        "posthog": {
            "api_key": "",
            "project_id": "",
            "host": "https://app.posthog.com"
        },
        "display": {
            "refresh_interval": 30,
            "theme": "dark",
            "brightness": 100,
            "rotation": 0,
            "screensaver_timeout": 0,
            "metrics": {
                "top": {"type": "events_24h", "label": "Events", "enabled": true},
                "left": {"type": "unique_users_24h", "label": "Users", "enabled": true},
                "right": {"type": "page_views_24h", "label": "Views", "enabled": true}
            }
        },
        "network": {
            "wifi_ssid": "",
            "wifi_password": "",
            "static_ip": "",
            "use_dhcp": true
        },
        "advanced": {
            "debug_mode": false,
            "log_level": "INFO",
            "enable_telemetry": false
        },
        "ota": {
            "enabled": true,
            "branch": DEFAULT_BRANCH,
            "check_on_boot": true,
            "auto_pull": false,
            "last_update": null,
            "last_check": null,
            "update_schedule": DEFAULT_UPDATE_SCHEDULE,
            "backup_before_update": true,
            "max_backups": DEFAULT_MAX_BACKUPS
        }
    })
}

/// Merges `patch` into `base`: nested objects merge key by key, every other
/// value (arrays included) overwrites.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            merge_maps(base_map, patch_map);
        }
        (base, patch) => {
            *base = patch.clone();
        }
    }
}

fn merge_maps(base: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, patch_value) in patch {
        match base.get_mut(key) {
            Some(existing) if existing.is_object() && patch_value.is_object() => {
                deep_merge(existing, patch_value);
            }
            _ => {
                base.insert(key.clone(), patch_value.clone());
            }
        }
    }
}
