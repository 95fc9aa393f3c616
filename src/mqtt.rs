//! MQTT bridge: a dedicated connection thread mirroring the synchronous
//! listener-thread idiom, a cloneable publish handle, and the topic grammar
//! for inbound `.../set` commands.

use log::{info, warn};
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const CHANNEL_CAPACITY: usize = 64;

const SUBSCRIPTIONS: &[&str] =
    &["infinitive/+/set", "infinitive/zone/+/+/set", "infinitive/vacation/+/set"];

/// A command parsed off one of `SUBSCRIPTIONS`, payload already coerced.
#[derive(Debug, Clone, PartialEq)]
pub enum MqttCommand {
    /// `infinitive/{key}/set`
    Global { key: String, value: String },
    /// `infinitive/zone/{n}/{key}/set`
    Zone { zone: u8, key: String, value: String },
    /// `infinitive/vacation/{key}/set`
    Vacation { key: String, value: String },
}

enum Target {
    Global(String),
    Zone(u8, String),
    Vacation(String),
}

fn parse_topic(topic: &str) -> Option<Target> {
    let rest = topic.strip_prefix("infinitive/")?;
    let rest = rest.strip_suffix("/set")?;
    if let Some(zone_and_key) = rest.strip_prefix("zone/") {
        let (zone, key) = zone_and_key.split_once('/')?;
        return Some(Target::Zone(zone.parse().ok()?, key.to_string()));
    }
    if let Some(key) = rest.strip_prefix("vacation/") {
        return Some(Target::Vacation(key.to_string()));
    }
    Some(Target::Global(rest.to_string()))
}

/// Home Assistant (and some dumb MQTT clients) send float payloads like
/// `"72.0"` for values we treat as integers; drop a trailing `.0`.
fn coerce_payload(payload: &str) -> String {
    payload.strip_suffix(".0").unwrap_or(payload).to_string()
}

/// Cloneable publish/subscribe handle, shared by the dispatcher and the
/// pollers.
#[derive(Clone)]
pub struct MqttHandle {
    client: Arc<Mutex<Client>>,
}

impl MqttHandle {
    pub fn publish_retained(&self, topic: &str, payload: String) {
        let mut client = self.client.lock().unwrap();
        if let Err(e) = client.publish(topic, QoS::AtMostOnce, true, payload.as_bytes()) {
            warn!("mqtt publish to {topic} failed: {e}");
        }
    }

    /// Home Assistant MQTT discovery document for one zone's climate entity,
    /// published retained on `homeassistant/climate/infinitive_zone_{n}/config`.
    pub fn publish_ha_climate_discovery(&self, zone: u8, name: &str) {
        let object_id = format!("infinitive_zone_{zone}");
        let config = serde_json::json!({
            "name": name,
            "unique_id": object_id,
            "mode_command_topic": format!("infinitive/zone/{zone}/mode/set"),
            "mode_state_topic": format!("mqtt/infinitive/zone/{zone}/mode"),
            "temperature_command_topic": format!("infinitive/zone/{zone}/heatSetpoint/set"),
            "temperature_state_topic": format!("mqtt/infinitive/zone/{zone}/heatSetpoint"),
            "current_temperature_topic": format!("mqtt/infinitive/zone/{zone}/currentTemp"),
            "fan_mode_command_topic": format!("infinitive/zone/{zone}/fanMode/set"),
            "fan_mode_state_topic": format!("mqtt/infinitive/zone/{zone}/fanMode"),
            "modes": ["heat", "cool", "auto", "off"],
            "fan_modes": ["auto", "low", "med", "high"],
            "availability_topic": "infinitive/available",
        });
        let topic = format!("homeassistant/climate/{object_id}/config");
        self.publish_retained(&topic, config.to_string());
    }

    pub fn publish_ha_available(&self, online: bool) {
        self.publish_retained("infinitive/available", if online { "online" } else { "offline" }.to_string());
    }

    /// Home Assistant MQTT discovery document for a plain sensor entity,
    /// published retained on `homeassistant/sensor/{object_id}/config`.
    pub fn publish_ha_sensor_discovery(&self, object_id: &str, name: &str, state_topic: &str, unit: Option<&str>) {
        let mut config = serde_json::json!({
            "name": name,
            "unique_id": object_id,
            "state_topic": state_topic,
            "availability_topic": "infinitive/available",
        });
        if let Some(unit) = unit {
            config["unit_of_measurement"] = serde_json::json!(unit);
        }
        let topic = format!("homeassistant/sensor/{object_id}/config");
        self.publish_retained(&topic, config.to_string());
    }
}

/// Connect and spawn the listener thread. `on_command` is invoked from that
/// thread for every parsed inbound message; `on_connect` fires once per
/// (re)connection, handed the handle so it can re-publish discovery docs and
/// clear the MQTT cache.
pub fn connect(
    broker_host: &str,
    broker_port: u16,
    client_id: &str,
    username: Option<&str>,
    password: Option<&str>,
    on_command: impl Fn(MqttCommand) + Send + Sync + 'static,
    on_connect: impl Fn(&MqttHandle) + Send + Sync + 'static,
) -> MqttHandle {
    let mut options = MqttOptions::new(client_id, broker_host, broker_port);
    options.set_keep_alive(KEEP_ALIVE);
    if let (Some(user), Some(pass)) = (username, password) {
        options.set_credentials(user, pass);
    }

    let (client, connection) = Client::new(options, CHANNEL_CAPACITY);
    let handle = MqttHandle { client: Arc::new(Mutex::new(client)) };

    {
        let mut client = handle.client.lock().unwrap();
        for topic in SUBSCRIPTIONS {
            if let Err(e) = client.subscribe(*topic, QoS::AtLeastOnce) {
                warn!("mqtt subscribe to {topic} failed: {e}");
            }
        }
    }

    spawn_listener(connection, handle.clone(), on_command, on_connect);
    handle
}

fn spawn_listener(
    mut connection: Connection,
    handle: MqttHandle,
    on_command: impl Fn(MqttCommand) + Send + Sync + 'static,
    on_connect: impl Fn(&MqttHandle) + Send + Sync + 'static,
) {
    thread::spawn(move || {
        info!("mqtt listening for messages");
        for notification in connection.iter() {
            match notification {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt (re)connected");
                    on_connect(&handle);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = String::from_utf8_lossy(&publish.payload).to_string();
                    match parse_topic(&publish.topic) {
                        Some(target) => on_command(attach_payload(target, &payload)),
                        None => warn!("unrecognised mqtt topic: {}", publish.topic),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("mqtt connection error: {e}"),
            }
        }
        warn!("mqtt connection loop exited");
    });
}

fn attach_payload(target: Target, payload: &str) -> MqttCommand {
    let value = coerce_payload(payload);
    match target {
        Target::Global(key) => MqttCommand::Global { key, value },
        Target::Zone(zone, key) => MqttCommand::Zone { zone, key, value },
        Target::Vacation(key) => MqttCommand::Vacation { key, value },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_set_topic() {
        match parse_topic("infinitive/mode/set") {
            Some(Target::Global(key)) => assert_eq!(key, "mode"),
            _ => panic!("expected Global"),
        }
    }

    #[test]
    fn parses_zone_set_topic() {
        match parse_topic("infinitive/zone/3/heatSetpoint/set") {
            Some(Target::Zone(zone, key)) => {
                assert_eq!(zone, 3);
                assert_eq!(key, "heatSetpoint");
            }
            _ => panic!("expected Zone"),
        }
    }

    #[test]
    fn parses_vacation_set_topic() {
        match parse_topic("infinitive/vacation/minTemp/set") {
            Some(Target::Vacation(key)) => assert_eq!(key, "minTemp"),
            _ => panic!("expected Vacation"),
        }
    }

    #[test]
    fn rejects_non_set_topics() {
        assert!(parse_topic("infinitive/zone/1/heatSetpoint").is_none());
        assert!(parse_topic("other/topic/set").is_none());
    }

    #[test]
    fn coerces_trailing_dot_zero() {
        assert_eq!(coerce_payload("72.0"), "72");
        assert_eq!(coerce_payload("72.5"), "72.5");
        assert_eq!(coerce_payload("auto"), "auto");
    }
}
