use std::collections::HashMap;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::iqair::DeviceUpdate;

/// Topic of the connection's last will. There is one will per connection,
/// so multi-device setups get a bridge-wide topic.
fn last_will_topic(config: &Config) -> String {
    match config.devices.as_slice() {
        [device] => config.device_status_topic(&device.topic_name),
        _ => format!("{}/bridge_status", config.mqtt.topic_prefix),
    }
}

pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    config: Config,
}

impl MqttClient {
    pub fn new(config: &Config) -> Self {
        let mut mqttopts = MqttOptions::new(
            &config.mqtt.client_id,
            &config.mqtt.broker_host,
            config.mqtt.broker_port,
        );
        mqttopts.set_keep_alive(std::time::Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
            mqttopts.set_credentials(user, pass);
        }

        let lwt = rumqttc::LastWill::new(
            last_will_topic(config),
            "offline".as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        );
        mqttopts.set_last_will(lwt);

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Self {
            client,
            eventloop,
            config: config.clone(),
        }
    }

    /// Run the MQTT event loop. Subscribes to command topics on connect,
    /// forwards incoming publish messages through command_tx, and publishes
    /// device updates received from update_rx.
    pub async fn run(
        mut self,
        command_tx: mpsc::Sender<MqttMessage>,
        mut update_rx: mpsc::Receiver<DeviceUpdate>,
    ) {
        let subscribe_topics: Vec<String> = self
            .config
            .devices
            .iter()
            .map(|d| self.config.device_command_topic(&d.topic_name))
            .collect();

        let mut last_values: HashMap<String, String> = HashMap::new();

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("Connected to MQTT broker");
                            // Retained state may be stale after a reconnect.
                            last_values.clear();

                            // Clear a retained will left by an earlier unclean disconnect.
                            let will_topic = last_will_topic(&self.config);
                            if let Err(e) = self
                                .client
                                .publish(&will_topic, QoS::AtLeastOnce, true, "online")
                                .await
                            {
                                error!("Failed to publish online status: {}", e);
                            }

                            for topic in &subscribe_topics {
                                if let Err(e) = self.client.subscribe(topic, QoS::AtLeastOnce).await {
                                    error!("Failed to subscribe to {}: {}", topic, e);
                                }
                            }
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let msg = MqttMessage {
                                topic: publish.topic.clone(),
                                payload: String::from_utf8_lossy(&publish.payload).to_string(),
                            };
                            if command_tx.send(msg).await.is_err() {
                                warn!("Command channel closed");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT connection error: {}. Reconnecting...", e);
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                    }
                }
                Some(update) = update_rx.recv() => {
                    let (topic, value) = match update {
                        DeviceUpdate::State { topic_name, key, value } => {
                            (self.config.device_state_topic(&topic_name, &key), value)
                        }
                        DeviceUpdate::Availability { topic_name, online } => (
                            self.config.device_status_topic(&topic_name),
                            if online { "online" } else { "offline" }.to_string(),
                        ),
                    };
                    if last_values.get(&topic) == Some(&value) {
                        continue;
                    }
                    info!("Publishing {}: {}", topic, value);
                    if let Err(e) = self
                        .client
                        .publish(&topic, QoS::AtLeastOnce, true, value.as_bytes())
                        .await
                    {
                        warn!("Failed to publish {}: {}", topic, e);
                        continue;
                    }
                    last_values.insert(topic, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, IqairConfig, MqttConfig};

    fn config(names: &[&str]) -> Config {
        Config {
            mqtt: MqttConfig {
                broker_host: "localhost".to_string(),
                broker_port: 1883,
                username: None,
                password: None,
                topic_prefix: "iqair".to_string(),
                client_id: "iqair-to-mqtt".to_string(),
            },
            iqair: IqairConfig {
                login_token: "login".to_string(),
                user_id: "user".to_string(),
                auth_token: "auth".to_string(),
                poll_interval_secs: 30,
            },
            devices: names
                .iter()
                .map(|name| DeviceConfig {
                    id: name.to_string(),
                    serial_number: None,
                    name: name.to_string(),
                    topic_name: name.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_last_will_topic_single_device() {
        assert_eq!(last_will_topic(&config(&["bedroom"])), "iqair/bedroom/bridge_status");
    }

    #[test]
    fn test_last_will_topic_multi_device() {
        // No device task reports on this topic, so it must be set online on connect.
        let config = config(&["bedroom", "office"]);
        let topic = last_will_topic(&config);
        assert_eq!(topic, "iqair/bridge_status");
        assert!(
            config
                .devices
                .iter()
                .all(|d| config.device_status_topic(&d.topic_name) != topic)
        );
    }
}
