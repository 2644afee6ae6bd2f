mod config;
mod iqair;
mod mqtt;

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting iqair-to-mqtt bridge (mqtt={}:{}, devices={})",
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.devices.len(),
    );

    for device in &config.devices {
        info!(
            "  Device: {} ({}) serial={}",
            device.name,
            device.id,
            device.serial_number.as_deref().unwrap_or("<none>"),
        );
        if device.serial_number.is_none() {
            warn!("Device {} has no serial number; commands will be refused", device.name);
        }
    }

    // Channels
    let (mqtt_cmd_tx, mut mqtt_cmd_rx) = mpsc::channel::<mqtt::client::MqttMessage>(100);
    let (update_tx, update_rx) = mpsc::channel::<iqair::DeviceUpdate>(200);

    let mqtt_client = mqtt::client::MqttClient::new(&config);
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(mqtt_cmd_tx, update_rx).await;
    });

    // Per-device channels: keyed by topic_name for command routing
    let mut device_cmd_txs: HashMap<String, mpsc::Sender<iqair::DeviceCommand>> = HashMap::new();

    let poll_interval = Duration::from_secs(config.iqair.poll_interval_secs);
    let mut device_handles = Vec::new();

    for device_config in &config.devices {
        let transport = match iqair::client::HttpTransport::new(&config.iqair) {
            Ok(t) => t,
            Err(e) => {
                error!("Failed to create HTTP client: {}", e);
                std::process::exit(1);
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::channel::<iqair::DeviceCommand>(50);
        device_cmd_txs.insert(device_config.topic_name.clone(), cmd_tx);

        let task = iqair::client::DeviceTask::new(device_config.clone(), transport);
        let tx = update_tx.clone();
        device_handles.push(tokio::spawn(task.run(tx, cmd_rx, poll_interval)));
    }

    // Drop the original sender so the channel closes when all device tasks finish
    drop(update_tx);

    let topic_prefix = config.mqtt.topic_prefix.clone();

    // Main loop: route MQTT commands to devices + handle shutdown
    loop {
        tokio::select! {
            Some(msg) = mqtt_cmd_rx.recv() => {
                // Parse topic: {prefix}/{topic_name}/command/{name}
                let Some((topic_name, name)) = parse_command_topic(&msg.topic, &topic_prefix) else {
                    continue;
                };
                let Some(cmd_tx) = device_cmd_txs.get(topic_name) else {
                    warn!("Unknown device in command topic: {}", topic_name);
                    continue;
                };
                match iqair::command::build_command(name, &msg.payload) {
                    Some(cmd) => {
                        if cmd_tx.send(cmd).await.is_err() {
                            warn!("Command channel closed for device {}", topic_name);
                        }
                    }
                    None => warn!("Could not build command: name={}, value={}", name, msg.payload),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => { sigterm.recv().await; }
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            } => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    // Cleanup
    for handle in device_handles {
        handle.abort();
    }
    mqtt_handle.abort();
    info!("iqair-to-mqtt bridge stopped");
}

/// Parse a command topic into (topic_name, command name).
/// Expected format: {prefix}/{topic_name}/command/{name}
fn parse_command_topic<'a>(topic: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let (topic_name, rest) = rest.split_once('/')?;
    let name = rest.strip_prefix("command/")?;
    if topic_name.is_empty() || name.is_empty() {
        return None;
    }
    Some((topic_name, name))
}
