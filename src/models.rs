//! Cache payload types. The source keys an untyped map by string; here we
//! model that with a small closed tagged variant so equality is structural
//! (§9 Design Notes).

use crate::protocol::tables::{Action, FanMode, Mode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub zone_id: u8,
    pub name: String,
    pub current_temp: u8,
    pub current_humidity: u8,
    pub heat_setpoint: u8,
    pub cool_setpoint: u8,
    pub target_humidity: u8,
    pub fan_mode: FanMode,
    pub hold: bool,
    pub preset: String,
    pub override_duration_minutes: u16,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonesConfig {
    pub zones: Vec<ZoneConfig>,
    pub mode: Mode,
    pub stage: u8,
    pub action: Action,
    pub outdoor_temp: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VacationConfig {
    pub active: bool,
    pub hours: u16,
    pub min_temp: u8,
    pub max_temp: u8,
    pub min_humidity: u8,
    pub max_humidity: u8,
    pub fan_mode: FanMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AirHandlerStatus {
    pub blower_rpm: u16,
    pub heat_stage: u8,
    pub airflow_cfm: u16,
    pub static_pressure: f32,
    pub elec_heat: bool,
    pub action: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatPumpStatus {
    pub coil_temp: f32,
    pub outside_temp: f32,
    pub stage: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamperStatus {
    pub positions: [Option<f32>; 8],
    pub flow_weights: [Option<f32>; 8],
}

/// Tagged variant for the small closed set of cache payload shapes, plus a
/// catch-all scalar for the per-key MQTT publications (`mqtt/infinitive/...`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheValue {
    Zones(ZonesConfig),
    Vacation(VacationConfig),
    AirHandler(AirHandlerStatus),
    HeatPump(HeatPumpStatus),
    Damper(DamperStatus),
    Scalar(serde_json::Value),
}
