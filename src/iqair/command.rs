use tracing::warn;

use super::state::{AUTO_MODE_PROFILE_NAMES, LIGHT_LEVEL_NAMES, id_for};

/// A command received from MQTT, ready for [`super::client::IqairClient::execute`].
///
/// Numeric ranges are checked by the client, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Power(bool),
    FanSpeed(u8),
    /// 0-100; 0 turns the purifier off.
    FanPercentage(u8),
    LightIndicator(bool),
    LightLevel(u8),
    AutoMode(bool),
    AutoModeProfile(u8),
    Lock(bool),
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" => Some(true),
        "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn parse_int(raw: &str) -> Option<u8> {
    let raw = raw.trim();
    raw.parse::<u8>()
        .ok()
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f.round().min(255.0) as u8)
        })
}

/// Build a DeviceCommand from a command name + payload.
pub fn build_command(name: &str, raw_value: &str) -> Option<DeviceCommand> {
    let command = match name {
        "power" => parse_bool(raw_value).map(DeviceCommand::Power),
        "fan_speed" => parse_int(raw_value).map(DeviceCommand::FanSpeed),
        "fan_percentage" => parse_int(raw_value).map(DeviceCommand::FanPercentage),
        "light_indicator" => parse_bool(raw_value).map(DeviceCommand::LightIndicator),
        "light_level" => parse_int(raw_value)
            .or_else(|| id_for(&LIGHT_LEVEL_NAMES, raw_value.trim()))
            .map(DeviceCommand::LightLevel),
        "auto_mode" => parse_bool(raw_value).map(DeviceCommand::AutoMode),
        "auto_mode_profile" => parse_int(raw_value)
            .or_else(|| id_for(&AUTO_MODE_PROFILE_NAMES, raw_value.trim()))
            .map(DeviceCommand::AutoModeProfile),
        "lock" => parse_bool(raw_value).map(DeviceCommand::Lock),
        _ => {
            warn!("Unknown command: {}", name);
            return None;
        }
    };
    if command.is_none() {
        warn!("Invalid value for {}: {}", name, raw_value);
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booleans() {
        assert_eq!(build_command("power", "ON"), Some(DeviceCommand::Power(true)));
        assert_eq!(build_command("lock", "0"), Some(DeviceCommand::Lock(false)));
        assert_eq!(build_command("auto_mode", "maybe"), None);
    }

    #[test]
    fn test_numbers_and_names() {
        assert_eq!(build_command("fan_speed", "4"), Some(DeviceCommand::FanSpeed(4)));
        assert_eq!(
            build_command("fan_percentage", "33.4"),
            Some(DeviceCommand::FanPercentage(33))
        );
        assert_eq!(
            build_command("light_level", "Medium"),
            Some(DeviceCommand::LightLevel(2))
        );
        assert_eq!(
            build_command("auto_mode_profile", "max"),
            Some(DeviceCommand::AutoModeProfile(3))
        );
        // Out of range values pass through; the client rejects them.
        assert_eq!(build_command("fan_speed", "9"), Some(DeviceCommand::FanSpeed(9)));
    }

    #[test]
    fn test_non_numeric_floats_rejected() {
        // None of these may turn into FanPercentage(0), which powers off.
        for raw in ["nan", "NaN", "-20", "-0.5", "inf", "-inf"] {
            assert_eq!(build_command("fan_percentage", raw), None, "payload {raw:?}");
        }
        assert_eq!(build_command("fan_speed", "nan"), None);
        assert_eq!(
            build_command("fan_percentage", "300"),
            Some(DeviceCommand::FanPercentage(255))
        );
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(build_command("turbo", "1"), None);
    }
}
