use serde_json::Value;

use super::interpret::{StateDelta, StateKey, StateValue};

/// Number of manual fan speeds.
pub const SPEED_COUNT: u8 = 6;

/// `powerMode` code for "on". Anything else is off (3 in practice).
pub const POWER_MODE_ON: u8 = 2;
pub const POWER_MODE_OFF: u8 = 3;

pub const LIGHT_LEVEL_NAMES: [(u8, &str); 3] = [(1, "Low"), (2, "Medium"), (3, "High")];
pub const AUTO_MODE_PROFILE_NAMES: [(u8, &str); 3] = [(1, "Quiet"), (2, "Balanced"), (3, "Max")];

pub fn name_for(table: &[(u8, &'static str)], id: u8) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == id).map(|(_, v)| *v)
}

pub fn id_for(table: &[(u8, &str)], name: &str) -> Option<u8> {
    table
        .iter()
        .find(|(_, v)| v.eq_ignore_ascii_case(name))
        .map(|(k, _)| *k)
}

/// Map a 0-100 fan percentage onto a speed level (1..=6). 0 is "off" and
/// handled by the caller.
pub fn percentage_to_speed_level(percentage: u8) -> u8 {
    let level = (u32::from(percentage) * u32::from(SPEED_COUNT)).div_ceil(100);
    level.clamp(1, u32::from(SPEED_COUNT)) as u8
}

/// Last known JSON state of one purifier, as returned by the web API.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    data: Option<Value>,
}

impl DeviceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    /// Replace the whole snapshot with a fresh poll result.
    pub fn replace(&mut self, data: Value) {
        self.data = Some(data);
    }

    fn remote(&self) -> Option<&serde_json::Map<String, Value>> {
        self.data.as_ref()?.get("remote")?.as_object()
    }

    /// Merge a command delta into `remote`. Returns false if nothing changed
    /// because the delta was empty or no snapshot is loaded yet.
    pub fn merge(&mut self, delta: &StateDelta) -> bool {
        if delta.is_empty() {
            return false;
        }
        let Some(data) = self.data.as_mut().and_then(Value::as_object_mut) else {
            return false;
        };

        let remote = data
            .entry("remote")
            .or_insert_with(|| Value::Object(Default::default()));
        let Some(remote) = remote.as_object_mut() else {
            return false;
        };

        // The fan percentage is not in the response; look it up in the
        // device's own speed table.
        if let Some(StateValue::Int(level)) = delta.get(StateKey::SpeedLevel) {
            let percent = remote
                .get("manSpeedTable")
                .and_then(Value::as_array)
                .and_then(|table| table.get(usize::from(level).checked_sub(1)?))
                .cloned();
            if let Some(percent) = percent {
                remote.insert("speedPercent".into(), percent);
            }
        }

        remote.extend(delta.to_json());
        true
    }

    /// Entity-level view of the snapshot: (key, rendered value) pairs.
    pub fn published_states(&self) -> Vec<(&'static str, String)> {
        let mut states = Vec::new();
        let Some(remote) = self.remote() else {
            return states;
        };

        let int = |key: StateKey| {
            remote
                .get(key.as_str())
                .and_then(Value::as_u64)
                .and_then(|n| u8::try_from(n).ok())
        };
        let flag = |key: StateKey| remote.get(key.as_str()).and_then(Value::as_bool);
        let on_off = |b: bool| if b { "on" } else { "off" }.to_string();

        if let Some(mode) = int(StateKey::PowerMode) {
            states.push(("power", on_off(mode == POWER_MODE_ON)));
        }
        if let Some(level) = int(StateKey::SpeedLevel) {
            states.push(("speed_level", level.to_string()));
        }
        if let Some(percent) = remote.get("speedPercent").and_then(Value::as_u64) {
            states.push(("speed_percent", percent.to_string()));
        }
        if let Some(enabled) = flag(StateKey::LightIndicatorEnabled) {
            states.push(("light_indicator", on_off(enabled)));
        }
        if let Some(name) = int(StateKey::LightLevel).and_then(|l| name_for(&LIGHT_LEVEL_NAMES, l)) {
            states.push(("light_level", name.to_string()));
        }
        if let Some(enabled) = flag(StateKey::AutoModeEnabled) {
            states.push(("auto_mode", on_off(enabled)));
        }
        if let Some(name) =
            int(StateKey::AutoModeProfile).and_then(|p| name_for(&AUTO_MODE_PROFILE_NAMES, p))
        {
            states.push(("auto_mode_profile", name.to_string()));
        }
        if let Some(enabled) = flag(StateKey::IsLocksEnabled) {
            states.push(("lock", on_off(enabled)));
        }
        if let Some(model) = self
            .data
            .as_ref()
            .and_then(|d| d.get("modelLabel"))
            .and_then(Value::as_str)
        {
            states.push(("model", model.to_string()));
        }
        states
    }
}
