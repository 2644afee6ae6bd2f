//! Turns a command acknowledgement into a partial device-state update.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use super::error::{IqairError, Result};
use super::grpc_web::{DecodedFrame, FRAME_HEADER_LEN, FieldCode};

/// Raw offset of the value byte in a DATA acknowledgement.
const VALUE_OFFSET: usize = 6;

/// The command endpoints of the UI2 service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    SetFanSpeed,
    SetPowerMode,
    SetLightIndicator,
    SetLightLevel,
    SetAutoMode,
    SetAutoModeProfile,
    SetDefaultLocks,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::SetFanSpeed => "/SetFanSpeed",
            Endpoint::SetPowerMode => "/SetPowerMode",
            Endpoint::SetLightIndicator => "/SetLightIndicator",
            Endpoint::SetLightLevel => "/SetLightLevel",
            Endpoint::SetAutoMode => "/SetAutoMode",
            Endpoint::SetAutoModeProfile => "/SetAutoModeProfile",
            Endpoint::SetDefaultLocks => "/SetDefaultLocks",
        }
    }

    pub fn field_code(self) -> FieldCode {
        match self {
            Endpoint::SetFanSpeed => FieldCode::FAN_SPEED,
            Endpoint::SetPowerMode => FieldCode::POWER,
            Endpoint::SetLightIndicator => FieldCode::LIGHT_INDICATOR,
            Endpoint::SetLightLevel => FieldCode::LIGHT_LEVEL,
            Endpoint::SetAutoMode => FieldCode::AUTO_MODE,
            Endpoint::SetAutoModeProfile => FieldCode::AUTO_MODE_PROFILE,
            Endpoint::SetDefaultLocks => FieldCode::LOCKS,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Keys of the `remote` object in the device snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StateKey {
    PowerMode,
    SpeedLevel,
    LightIndicatorEnabled,
    LightLevel,
    AutoModeEnabled,
    AutoModeProfile,
    IsLocksEnabled,
}

impl StateKey {
    pub fn as_str(self) -> &'static str {
        match self {
            StateKey::PowerMode => "powerMode",
            StateKey::SpeedLevel => "speedLevel",
            StateKey::LightIndicatorEnabled => "lightIndicatorEnabled",
            StateKey::LightLevel => "lightLevel",
            StateKey::AutoModeEnabled => "autoModeEnabled",
            StateKey::AutoModeProfile => "autoModeProfile",
            StateKey::IsLocksEnabled => "isLocksEnabled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateValue {
    Bool(bool),
    Int(u8),
}

impl From<StateValue> for Value {
    fn from(value: StateValue) -> Self {
        match value {
            StateValue::Bool(b) => Value::Bool(b),
            StateValue::Int(n) => Value::from(n),
        }
    }
}

/// Partial state produced by one command response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDelta(BTreeMap<StateKey, StateValue>);

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: StateKey, value: StateValue) -> Self {
        self.0.insert(key, value);
        self
    }

    pub fn get(&self, key: StateKey) -> Option<StateValue> {
        self.0.get(&key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StateKey, StateValue)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    /// JSON object keyed by the snapshot's camelCase names.
    pub fn to_json(&self) -> Map<String, Value> {
        self.iter()
            .map(|(k, v)| (k.as_str().to_string(), Value::from(v)))
            .collect()
    }
}

/// How a value byte maps into the delta.
#[derive(Debug, Clone, Copy)]
enum ValueRule {
    /// Store the raw code.
    Raw(StateKey),
    /// `value == 1` means enabled.
    Flag(StateKey),
    /// Setting a light level also turns the indicator on.
    LightLevel,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    /// Key set to `false` by a header-only acknowledgement.
    cleared: Option<StateKey>,
    value: ValueRule,
}

fn rule(endpoint: Endpoint) -> Rule {
    use StateKey::*;
    match endpoint {
        Endpoint::SetPowerMode => Rule {
            cleared: None,
            value: ValueRule::Raw(PowerMode),
        },
        Endpoint::SetFanSpeed => Rule {
            cleared: None,
            value: ValueRule::Raw(SpeedLevel),
        },
        Endpoint::SetLightLevel => Rule {
            cleared: None,
            value: ValueRule::LightLevel,
        },
        Endpoint::SetLightIndicator => Rule {
            cleared: Some(LightIndicatorEnabled),
            value: ValueRule::Flag(LightIndicatorEnabled),
        },
        Endpoint::SetAutoMode => Rule {
            cleared: Some(AutoModeEnabled),
            value: ValueRule::Flag(AutoModeEnabled),
        },
        Endpoint::SetAutoModeProfile => Rule {
            cleared: None,
            value: ValueRule::Raw(AutoModeProfile),
        },
        Endpoint::SetDefaultLocks => Rule {
            cleared: Some(IsLocksEnabled),
            value: ValueRule::Flag(IsLocksEnabled),
        },
    }
}

/// What the first response frame looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Header only, no payload: a boolean field was cleared.
    Cleared,
    /// DATA frame carrying a value byte.
    Value(u8),
    Other,
}

fn shape(frame: &DecodedFrame) -> Result<Shape> {
    let frame = match frame {
        DecodedFrame::Frame(frame) => frame,
        DecodedFrame::TooShort(_) => return Ok(Shape::Other),
        DecodedFrame::Invalid(reason) => return Err(IqairError::Decode(reason.clone())),
    };

    if frame.raw_len() == FRAME_HEADER_LEN {
        return Ok(Shape::Cleared);
    }
    if frame.is_data() && frame.raw_len() > VALUE_OFFSET {
        return frame
            .raw_byte(VALUE_OFFSET)
            .map(Shape::Value)
            .ok_or_else(|| IqairError::Decode("value byte out of range".into()));
    }
    Ok(Shape::Other)
}

/// Derive the state update for a command response.
///
/// Only the first frame is considered. An empty frame list is a valid
/// acknowledgement with nothing to merge.
pub fn interpret(endpoint: Endpoint, frames: &[DecodedFrame]) -> Result<StateDelta> {
    let Some(first) = frames.first() else {
        return Ok(StateDelta::new());
    };

    let rule = rule(endpoint);
    let delta = match shape(first)? {
        Shape::Cleared => match rule.cleared {
            Some(key) => StateDelta::new().with(key, StateValue::Bool(false)),
            None => StateDelta::new(),
        },
        Shape::Value(value) => match rule.value {
            ValueRule::Raw(key) => StateDelta::new().with(key, StateValue::Int(value)),
            ValueRule::Flag(key) => StateDelta::new().with(key, StateValue::Bool(value == 1)),
            ValueRule::LightLevel => StateDelta::new()
                .with(StateKey::LightLevel, StateValue::Int(value))
                .with(StateKey::LightIndicatorEnabled, StateValue::Bool(true)),
        },
        Shape::Other => StateDelta::new(),
    };
    Ok(delta)
}
