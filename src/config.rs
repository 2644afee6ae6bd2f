use serde::Deserialize;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub iqair: IqairConfig,
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct IqairConfig {
    /// `x-login-token` for the web (state) API.
    pub login_token: String,
    pub user_id: String,
    /// Bearer token for the gRPC-Web (command) API.
    pub auth_token: String,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub id: String,
    pub serial_number: Option<String>,
    pub name: String,
    /// Sanitized name for use in MQTT topics (lowercase, spaces to underscores)
    pub topic_name: String,
}

// Same shape as the web API's device listing, so a saved response works as-is.
#[derive(Deserialize)]
struct RawDevice {
    id: String,
    #[serde(default, rename = "serialNumber")]
    serial_number: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

fn env_required(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("{key} environment variable is required"))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let devices_file = env_or_default("DEVICES_FILE", "devices.json".to_string());
        let devices = load_devices(&devices_file)?;

        let config = Self {
            mqtt: MqttConfig {
                broker_host: env_required("MQTT_BROKER_HOST")?,
                broker_port: env_or_default("MQTT_BROKER_PORT", 1883),
                username: env_optional("MQTT_USERNAME"),
                password: env_optional("MQTT_PASSWORD"),
                topic_prefix: env_or_default("MQTT_TOPIC_PREFIX", "iqair".to_string()),
                client_id: env_or_default("MQTT_CLIENT_ID", "iqair-to-mqtt".to_string()),
            },
            iqair: IqairConfig {
                login_token: env_required("IQAIR_LOGIN_TOKEN")?,
                user_id: env_required("IQAIR_USER_ID")?,
                auth_token: env_required("IQAIR_AUTH_TOKEN")?,
                poll_interval_secs: env_or_default("IQAIR_POLL_INTERVAL_SECS", 30),
            },
            devices,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.mqtt.broker_host.is_empty() {
            return Err("MQTT_BROKER_HOST must not be empty".into());
        }
        if self.iqair.login_token.is_empty() || self.iqair.auth_token.is_empty() {
            return Err("IQAIR_LOGIN_TOKEN and IQAIR_AUTH_TOKEN must not be empty".into());
        }
        if self.devices.is_empty() {
            return Err("No devices found in devices file".into());
        }
        if self.iqair.poll_interval_secs == 0 {
            return Err("IQAIR_POLL_INTERVAL_SECS must be > 0".into());
        }
        Ok(())
    }

    pub fn device_status_topic(&self, topic_name: &str) -> String {
        format!("{}/{}/bridge_status", self.mqtt.topic_prefix, topic_name)
    }

    pub fn device_command_topic(&self, topic_name: &str) -> String {
        format!("{}/{}/command/#", self.mqtt.topic_prefix, topic_name)
    }

    pub fn device_state_topic(&self, topic_name: &str, key: &str) -> String {
        format!("{}/{}/state/{}", self.mqtt.topic_prefix, topic_name, key)
    }
}

fn load_devices(path: &str) -> Result<Vec<DeviceConfig>, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read {path}: {e}"))?;
    parse_devices(&content).map_err(|e| format!("Failed to parse {path}: {e}"))
}

fn parse_devices(content: &str) -> Result<Vec<DeviceConfig>, String> {
    let raw_devices: Vec<RawDevice> = serde_json::from_str(content).map_err(|e| e.to_string())?;

    Ok(raw_devices
        .into_iter()
        .map(|raw| {
            let name = raw.name.unwrap_or_else(|| raw.id.clone());
            let topic_name = sanitize_topic_name(&name);
            DeviceConfig {
                name,
                id: raw.id,
                serial_number: raw.serial_number.filter(|s| !s.is_empty()),
                topic_name,
            }
        })
        .collect())
}

/// Convert a device name into a safe MQTT topic segment.
/// "Living Room Purifier" → "living_room_purifier"
fn sanitize_topic_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_topic_name() {
        assert_eq!(sanitize_topic_name("Living Room Purifier"), "living_room_purifier");
        assert_eq!(sanitize_topic_name("  Atem X! "), "atem_x");
    }

    #[test]
    fn test_parse_devices() {
        let json = r#"[
            {"id": "abc", "name": "Bedroom", "serialNumber": "UI2_12345", "modelLabel": "Atem X"},
            {"id": "def", "serialNumber": ""}
        ]"#;
        let devices = parse_devices(json).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].topic_name, "bedroom");
        assert_eq!(devices[0].serial_number.as_deref(), Some("UI2_12345"));
        assert_eq!(devices[1].name, "def");
        assert_eq!(devices[1].serial_number, None);
    }

    #[test]
    fn test_parse_devices_rejects_bad_json() {
        assert!(parse_devices("{not json").is_err());
    }
}
