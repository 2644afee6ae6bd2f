pub mod client;
pub mod command;
pub mod error;
pub mod grpc_web;
pub mod interpret;
pub mod state;

pub use command::DeviceCommand;

/// A change to publish to MQTT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceUpdate {
    /// An entity value, e.g. `power` = `on`.
    State {
        topic_name: String,
        key: String,
        value: String,
    },
    /// Whether the last poll of the state API succeeded.
    Availability { topic_name: String, online: bool },
}
