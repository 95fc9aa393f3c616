//! Command-line configuration. Replaces the teacher's compile-time
//! `dotenv_codegen!` secrets with runtime flags plus one environment
//! variable for the one true secret (the MQTT password).

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "infinitive-bridge",
    about = "Bridges a Carrier Infinity / Bryant Evolution thermostat bus to a websocket and MQTT feed"
)]
pub struct Config {
    /// Serial device the thermostat bus is wired to (e.g. /dev/ttyUSB0).
    #[arg(long)]
    pub serial: String,

    /// HTTP/websocket listen port.
    #[arg(long, default_value_t = 8080)]
    pub http_port: u16,

    /// MQTT broker host. Omit to run without the MQTT bridge.
    #[arg(long)]
    pub mqtt_host: Option<String>,

    #[arg(long, default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long, default_value = "infinitive-bridge")]
    pub mqtt_client_id: String,

    #[arg(long)]
    pub mqtt_username: Option<String>,

    /// Append every frame seen on the bus to this path.
    #[arg(long)]
    pub response_log: Option<String>,

    /// Extra 6-hex-digit table addresses to round-robin one diagnostic READ
    /// against per `statePoller` tick. May be repeated.
    #[arg(long = "raw-monitor")]
    pub raw_monitor: Vec<String>,

    #[arg(long)]
    pub debug: bool,
}

impl Config {
    /// The MQTT password, if any, is read from the environment rather than
    /// taken as a flag so it never shows up in `ps`/shell history.
    pub fn mqtt_password(&self) -> Option<String> {
        std::env::var("MQTTPASS").ok()
    }
}
