use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{DeviceConfig, IqairConfig};

use super::error::{IqairError, Result};
use super::grpc_web::{decode_frames, describe_frames, encode_command};
use super::interpret::{Endpoint, StateDelta, interpret};
use super::state::{
    DeviceSnapshot, POWER_MODE_OFF, POWER_MODE_ON, SPEED_COUNT, percentage_to_speed_level,
};
use super::{DeviceCommand, DeviceUpdate};

const GRPC_API_URL: &str = "https://cloud-api.iqair.io/grpc.ui2.v1.UI2Service";
const WEB_API_URL: &str = "https://website-api.airvisual.com/v1/users";
const WEB_API_PARAMS: [(&str, &str); 5] = [
    ("page", "1"),
    ("perPage", "15"),
    ("units.system", "imperial"),
    ("AQI", "US"),
    ("language", "en"),
];

/// Sends one encoded command and returns the raw response body.
pub trait CommandTransport {
    fn post(&self, endpoint: Endpoint, body: String) -> impl Future<Output = Result<String>> + Send;
}

/// Fetches the account's device listing.
pub trait StateTransport {
    fn fetch_devices(&self) -> impl Future<Output = Result<Vec<Value>>> + Send;
}

/// reqwest-backed transport for both cloud APIs.
pub struct HttpTransport {
    command: reqwest::Client,
    state: reqwest::Client,
    user_id: String,
}

impl HttpTransport {
    pub fn new(config: &IqairConfig) -> Result<Self> {
        let mut command_headers = HeaderMap::new();
        command_headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/grpc-web-text"),
        );
        command_headers.insert(ACCEPT, HeaderValue::from_static("application/grpc-web-text"));
        command_headers.insert(
            "x-user-agent",
            HeaderValue::from_static("grpc-web-javascript/0.1"),
        );
        command_headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", config.auth_token))?,
        );

        let mut state_headers = HeaderMap::new();
        state_headers.insert("x-login-token", header_value(&config.login_token)?);

        let command = reqwest::Client::builder()
            .default_headers(command_headers)
            .timeout(Duration::from_secs(15))
            .build()?;
        let state = reqwest::Client::builder()
            .default_headers(state_headers)
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            command,
            state,
            user_id: config.user_id.clone(),
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| IqairError::InvalidArgument(format!("invalid header value: {e}")))
}

impl CommandTransport for HttpTransport {
    async fn post(&self, endpoint: Endpoint, body: String) -> Result<String> {
        let url = format!("{GRPC_API_URL}{}", endpoint.path());
        let response = self.command.post(&url).body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IqairError::Status { status, url });
        }
        Ok(response.text().await?)
    }
}

impl StateTransport for HttpTransport {
    async fn fetch_devices(&self) -> Result<Vec<Value>> {
        let url = format!("{WEB_API_URL}/{}/devices", self.user_id);
        let response = self.state.get(&url).query(&WEB_API_PARAMS).send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED => Err(IqairError::Unauthorized),
            status if !status.is_success() => Err(IqairError::Status { status, url }),
            _ => Ok(response.json().await?),
        }
    }
}

/// Command and state operations for one purifier.
///
/// Command methods return:
/// - `Err` when no request could be built (no serial number),
/// - `Ok(None)` when the value was rejected or the request failed,
/// - `Ok(Some(delta))` on success; the delta may be empty.
pub struct IqairClient<T> {
    transport: T,
    serial_number: Option<String>,
}

impl<T> IqairClient<T> {
    pub fn new(transport: T, serial_number: Option<String>) -> Self {
        Self {
            transport,
            serial_number,
        }
    }
}

impl<T: CommandTransport> IqairClient<T> {
    async fn send_command(
        &self,
        endpoint: Endpoint,
        value: Option<u8>,
        context: Option<&str>,
    ) -> Result<Option<StateDelta>> {
        let body = encode_command(self.serial_number.as_deref(), endpoint.field_code(), value)?;
        let context = context.map(|c| format!(" ({c})")).unwrap_or_default();

        let response = match self.transport.post(endpoint, body.clone()).await {
            Ok(text) => text,
            Err(e) => {
                error!("Error sending command to {}{}: {}", endpoint, context, e);
                return Ok(None);
            }
        };
        debug!(
            "Command to {} successful{}\nRequest Body: {}\nResponse Body:\n{}",
            endpoint,
            context,
            body,
            describe_frames(&response)
        );

        match interpret(endpoint, &decode_frames(&response)) {
            Ok(delta) => Ok(Some(delta)),
            Err(e) => {
                error!("Error parsing response from {}{}: {}", endpoint, context, e);
                Ok(None)
            }
        }
    }

    pub async fn set_power(&self, on: bool, context: Option<&str>) -> Result<Option<StateDelta>> {
        let value = if on { POWER_MODE_ON } else { POWER_MODE_OFF };
        self.send_command(Endpoint::SetPowerMode, Some(value), context)
            .await
    }

    pub async fn set_fan_speed(
        &self,
        speed_level: u8,
        context: Option<&str>,
    ) -> Result<Option<StateDelta>> {
        if !(1..=SPEED_COUNT).contains(&speed_level) {
            error!("Invalid fan speed level: {}", speed_level);
            return Ok(None);
        }
        self.send_command(Endpoint::SetFanSpeed, Some(speed_level), context)
            .await
    }

    pub async fn set_light_indicator(
        &self,
        on: bool,
        context: Option<&str>,
    ) -> Result<Option<StateDelta>> {
        self.send_command(Endpoint::SetLightIndicator, on.then_some(1), context)
            .await
    }

    pub async fn set_light_level(
        &self,
        level: u8,
        context: Option<&str>,
    ) -> Result<Option<StateDelta>> {
        if !(1..=3).contains(&level) {
            error!("Invalid light level: {}", level);
            return Ok(None);
        }
        self.send_command(Endpoint::SetLightLevel, Some(level), context)
            .await
    }

    pub async fn set_auto_mode(
        &self,
        on: bool,
        context: Option<&str>,
    ) -> Result<Option<StateDelta>> {
        self.send_command(Endpoint::SetAutoMode, on.then_some(1), context)
            .await
    }

    pub async fn set_auto_mode_profile(
        &self,
        profile: u8,
        context: Option<&str>,
    ) -> Result<Option<StateDelta>> {
        if !(1..=3).contains(&profile) {
            error!("Invalid auto mode profile ID: {}", profile);
            return Ok(None);
        }
        self.send_command(Endpoint::SetAutoModeProfile, Some(profile), context)
            .await
    }

    pub async fn set_lock(&self, on: bool, context: Option<&str>) -> Result<Option<StateDelta>> {
        self.send_command(Endpoint::SetDefaultLocks, on.then_some(1), context)
            .await
    }

    /// Dispatch a bridge command to the matching operation.
    pub async fn execute(&self, command: DeviceCommand) -> Result<Option<StateDelta>> {
        match command {
            DeviceCommand::Power(on) => self.set_power(on, Some("power")).await,
            DeviceCommand::FanSpeed(level) => self.set_fan_speed(level, Some("fan_speed")).await,
            DeviceCommand::FanPercentage(0) => {
                self.set_power(false, Some("fan_percentage")).await
            }
            DeviceCommand::FanPercentage(p) => {
                self.set_fan_speed(percentage_to_speed_level(p), Some("fan_percentage"))
                    .await
            }
            DeviceCommand::LightIndicator(on) => self.set_light_indicator(on, None).await,
            DeviceCommand::LightLevel(level) => self.set_light_level(level, None).await,
            DeviceCommand::AutoMode(on) => self.set_auto_mode(on, None).await,
            DeviceCommand::AutoModeProfile(p) => self.set_auto_mode_profile(p, None).await,
            DeviceCommand::Lock(on) => self.set_lock(on, None).await,
        }
    }
}

impl<T: StateTransport> IqairClient<T> {
    /// State of one device from the account listing, if present.
    pub async fn fetch_device_state(&self, device_id: &str) -> Result<Option<Value>> {
        let devices = self.transport.fetch_devices().await?;
        Ok(devices
            .into_iter()
            .find(|d| d.get("id").and_then(Value::as_str) == Some(device_id)))
    }
}

/// Owns one device's snapshot. Polls and command results are applied here,
/// one at a time.
pub struct DeviceTask<T> {
    config: DeviceConfig,
    client: IqairClient<T>,
    snapshot: DeviceSnapshot,
}

impl<T: CommandTransport + StateTransport> DeviceTask<T> {
    pub fn new(config: DeviceConfig, transport: T) -> Self {
        let client = IqairClient::new(transport, config.serial_number.clone());
        Self {
            config,
            client,
            snapshot: DeviceSnapshot::new(),
        }
    }

    /// Main device loop: polls the state API and executes commands.
    pub async fn run(
        mut self,
        update_tx: mpsc::Sender<DeviceUpdate>,
        mut cmd_rx: mpsc::Receiver<DeviceCommand>,
        poll_interval: Duration,
    ) {
        let min_backoff = Duration::from_secs(5);
        let max_backoff = Duration::from_secs(60);
        let mut backoff = min_backoff;
        let mut next_poll = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_poll) => {
                    match self.refresh(&update_tx).await {
                        Ok(()) => {
                            backoff = min_backoff;
                            next_poll = tokio::time::Instant::now() + poll_interval;
                        }
                        Err(e) => {
                            match e {
                                IqairError::Unauthorized => error!(
                                    "Device {}: login token rejected, new credentials required. Retrying in {:?}",
                                    self.config.name, backoff
                                ),
                                other => warn!(
                                    "Device {} poll failed: {}. Retrying in {:?}",
                                    self.config.name, other, backoff
                                ),
                            }
                            self.send(&update_tx, DeviceUpdate::Availability {
                                topic_name: self.config.topic_name.clone(),
                                online: false,
                            }).await;
                            next_poll = tokio::time::Instant::now() + backoff;
                            backoff = (backoff * 2).min(max_backoff);
                        }
                    }
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        info!("Command channel closed for device {}", self.config.name);
                        return;
                    };
                    info!("Sending command to {}: {:?}", self.config.name, cmd);
                    match self.client.execute(cmd).await {
                        Ok(Some(delta)) => {
                            debug!("Device {} delta: {:?}", self.config.name, delta);
                            if self.snapshot.merge(&delta) {
                                self.publish_states(&update_tx).await;
                            } else if !self.snapshot.is_loaded() {
                                warn!("Device {}: no snapshot yet, dropping {:?}", self.config.name, delta);
                            }
                        }
                        Ok(None) => debug!("Device {}: no state update", self.config.name),
                        Err(e) => error!("Device {}: command not sent: {}", self.config.name, e),
                    }
                }
            }
        }
    }

    async fn refresh(&mut self, update_tx: &mpsc::Sender<DeviceUpdate>) -> Result<()> {
        let state = self
            .client
            .fetch_device_state(&self.config.id)
            .await?
            .ok_or_else(|| IqairError::DeviceNotFound(self.config.id.clone()))?;

        self.snapshot.replace(state);
        self.send(
            update_tx,
            DeviceUpdate::Availability {
                topic_name: self.config.topic_name.clone(),
                online: true,
            },
        )
        .await;
        self.publish_states(update_tx).await;
        Ok(())
    }

    async fn publish_states(&self, update_tx: &mpsc::Sender<DeviceUpdate>) {
        for (key, value) in self.snapshot.published_states() {
            self.send(
                update_tx,
                DeviceUpdate::State {
                    topic_name: self.config.topic_name.clone(),
                    key: key.to_string(),
                    value,
                },
            )
            .await;
        }
    }

    async fn send(&self, update_tx: &mpsc::Sender<DeviceUpdate>, update: DeviceUpdate) {
        if update_tx.send(update).await.is_err() {
            warn!("Update channel closed");
        }
    }
}
