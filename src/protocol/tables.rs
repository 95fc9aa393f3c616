//! Typed views over the Infinity protocol's table address space: fixed
//! layout records, encoded/decoded as big-endian packed fields.

use super::broker::BrokerHandle;
use super::constants::{TableAddr, OP_READ, OP_WRITE, SAM_ADDR, THERMOSTAT_ADDR};
use super::frame::Frame;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// Bytes preceding the packed record in a READ response: table address (3),
/// flags (1), reserved (2). Writes use the same 6-byte leader, with zone
/// index and the authoritative flag byte in place of the reserved bytes
/// (§4.5): address(3) + zone-index(1) + 0x00 + flag-byte(1).
const RESPONSE_HEADER_LEN: usize = 6;

pub trait Table: Sized {
    const ADDR: TableAddr;

    fn decode(record: &[u8]) -> Result<Self, EngineError>;
    fn encode(&self) -> Vec<u8>;
}

/// Read a table: send a READ with payload = table address, decode the
/// record past the response's 6-byte leader.
pub fn read_table<T: Table>(broker: &BrokerHandle) -> Option<T> {
    let request = Frame::new(THERMOSTAT_ADDR, SAM_ADDR, OP_READ, T::ADDR.to_vec()).ok()?;
    let response = broker.submit(request)?;
    if response.payload.len() < RESPONSE_HEADER_LEN {
        return None;
    }
    T::decode(&response.payload[RESPONSE_HEADER_LEN..]).ok()
}

/// Write a table: payload = address(3) + zone-index(1) + 0x00 + flag-byte(1)
/// + packed record. `zone_index` is 0 for zone-less tables.
pub fn write_table<T: Table>(broker: &BrokerHandle, zone_index: u8, flags: u8, record: &T) -> bool {
    let mut payload = Vec::with_capacity(RESPONSE_HEADER_LEN + 64);
    payload.extend_from_slice(&T::ADDR);
    payload.push(zone_index);
    payload.push(0x00);
    payload.push(flags);
    payload.extend_from_slice(&record.encode());

    let request = match Frame::new(THERMOSTAT_ADDR, SAM_ADDR, OP_WRITE, payload) {
        Ok(f) => f,
        Err(_) => return false,
    };
    broker.submit(request).is_some()
}

fn require_len(record: &[u8], need: usize) -> Result<(), EngineError> {
    if record.len() < need {
        return Err(EngineError::TableTooShort { got: record.len(), need });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Heat,
    Cool,
    Auto,
    Electric,
    Heatpump,
    Off,
}

impl Mode {
    pub fn from_raw(raw: u8) -> Result<Mode, EngineError> {
        Ok(match raw & 0x0F {
            0 => Mode::Heat,
            1 => Mode::Cool,
            2 => Mode::Auto,
            3 => Mode::Electric,
            4 => Mode::Heatpump,
            5 => Mode::Off,
            other => return Err(EngineError::UnknownMode(other)),
        })
    }

    pub fn to_raw(self) -> u8 {
        match self {
            Mode::Heat => 0,
            Mode::Cool => 1,
            Mode::Auto => 2,
            Mode::Electric => 3,
            Mode::Heatpump => 4,
            Mode::Off => 5,
        }
    }

    /// `stringModeToRaw` / `rawModeToString` round trip on the UI-exposed
    /// subset {heat, cool, auto, off}.
    pub fn from_str_ui(s: &str) -> Option<Mode> {
        match s {
            "heat" => Some(Mode::Heat),
            "cool" => Some(Mode::Cool),
            "auto" => Some(Mode::Auto),
            "off" => Some(Mode::Off),
            _ => None,
        }
    }

    pub fn as_str_ui(self) -> &'static str {
        match self {
            Mode::Heat => "heat",
            Mode::Cool => "cool",
            Mode::Auto => "auto",
            Mode::Electric => "electric",
            Mode::Heatpump => "heatpump",
            Mode::Off => "off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    Auto,
    Low,
    Med,
    High,
}

impl FanMode {
    pub fn from_raw(raw: u8) -> Result<FanMode, EngineError> {
        Ok(match raw {
            0 => FanMode::Auto,
            1 => FanMode::Low,
            2 => FanMode::Med,
            3 => FanMode::High,
            other => return Err(EngineError::UnknownFanMode(other)),
        })
    }

    pub fn to_raw(self) -> u8 {
        match self {
            FanMode::Auto => 0,
            FanMode::Low => 1,
            FanMode::Med => 2,
            FanMode::High => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Idle,
    Cooling,
    Heating,
}

impl Action {
    /// Derived from the top 3 bits of the mode byte: 0=idle, 1|2=cooling,
    /// >=3=heating.
    pub fn from_stage(stage: u8) -> Action {
        match stage {
            0 => Action::Idle,
            1 | 2 => Action::Cooling,
            _ => Action::Heating,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TStatCurrent {
    pub zone_temps: [u8; 8],
    pub zone_humidities: [u8; 8],
    pub outdoor_air_temp: u8,
    pub zone_unocc: u8,
    pub mode_raw: u8,
    pub displayed_zone: u8,
}

impl TStatCurrent {
    pub const LEN: usize = 8 + 8 + 1 + 1 + 1 + 5 + 1;

    pub fn mode(&self) -> Result<Mode, EngineError> {
        Mode::from_raw(self.mode_raw)
    }

    pub fn stage(&self) -> u8 {
        self.mode_raw >> 5
    }

    pub fn action(&self) -> Action {
        Action::from_stage(self.stage())
    }
}

impl Table for TStatCurrent {
    const ADDR: TableAddr = super::constants::ADDR_TSTAT_CURRENT;

    fn decode(record: &[u8]) -> Result<Self, EngineError> {
        require_len(record, Self::LEN)?;
        let mut zone_temps = [0u8; 8];
        zone_temps.copy_from_slice(&record[0..8]);
        let mut zone_humidities = [0u8; 8];
        zone_humidities.copy_from_slice(&record[8..16]);
        // record[16] = reserved
        let outdoor_air_temp = record[17];
        let zone_unocc = record[18];
        let mode_raw = record[19];
        // record[20..25] = reserved
        let displayed_zone = record[25];
        Ok(TStatCurrent { zone_temps, zone_humidities, outdoor_air_temp, zone_unocc, mode_raw, displayed_zone })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(&self.zone_temps);
        out.extend_from_slice(&self.zone_humidities);
        out.push(0);
        out.push(self.outdoor_air_temp);
        out.push(self.zone_unocc);
        out.push(self.mode_raw);
        out.extend_from_slice(&[0u8; 5]);
        out.push(self.displayed_zone);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TStatZone {
    pub fan_mode: [u8; 8],
    pub zone_hold: u8,
    pub heat_setpoint: [u8; 8],
    pub cool_setpoint: [u8; 8],
    pub target_humidity: [u8; 8],
    pub fan_auto_cfg: u8,
    pub override_duration: [u16; 8],
    pub zone_names: [String; 8],
}

impl TStatZone {
    pub const LEN: usize = 8 + 1 + 8 + 8 + 8 + 1 + 1 + 16 + 96;

    /// Whether zone `n` (1-based) is held, from the 8-bit hold mask.
    pub fn is_held(&self, zone: u8) -> bool {
        zone >= 1 && zone <= 8 && (self.zone_hold & (1 << (zone - 1))) != 0
    }
}

impl Table for TStatZone {
    const ADDR: TableAddr = super::constants::ADDR_TSTAT_ZONE;

    fn decode(record: &[u8]) -> Result<Self, EngineError> {
        require_len(record, Self::LEN)?;
        let mut fan_mode = [0u8; 8];
        fan_mode.copy_from_slice(&record[0..8]);
        let zone_hold = record[8];
        let mut heat_setpoint = [0u8; 8];
        heat_setpoint.copy_from_slice(&record[9..17]);
        let mut cool_setpoint = [0u8; 8];
        cool_setpoint.copy_from_slice(&record[17..25]);
        let mut target_humidity = [0u8; 8];
        target_humidity.copy_from_slice(&record[25..33]);
        let fan_auto_cfg = record[33];
        // record[34] = reserved
        let mut override_duration = [0u16; 8];
        for (i, slot) in override_duration.iter_mut().enumerate() {
            let offset = 35 + i * 2;
            *slot = u16::from_be_bytes([record[offset], record[offset + 1]]);
        }
        let names_start = 35 + 16;
        let mut zone_names: [String; 8] = Default::default();
        for (i, name) in zone_names.iter_mut().enumerate() {
            let offset = names_start + i * 12;
            let raw = &record[offset..offset + 12];
            *name = String::from_utf8_lossy(raw).trim_end_matches('\0').trim().to_string();
        }
        Ok(TStatZone {
            fan_mode,
            zone_hold,
            heat_setpoint,
            cool_setpoint,
            target_humidity,
            fan_auto_cfg,
            override_duration,
            zone_names,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(&self.fan_mode);
        out.push(self.zone_hold);
        out.extend_from_slice(&self.heat_setpoint);
        out.extend_from_slice(&self.cool_setpoint);
        out.extend_from_slice(&self.target_humidity);
        out.push(self.fan_auto_cfg);
        out.push(0);
        for d in &self.override_duration {
            out.extend_from_slice(&d.to_be_bytes());
        }
        for name in &self.zone_names {
            let mut bytes = name.as_bytes().to_vec();
            bytes.resize(12, 0);
            out.extend_from_slice(&bytes);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TStatVacation {
    pub active: u8,
    pub hours: u16,
    pub min_temp: u8,
    pub max_temp: u8,
    pub min_hum: u8,
    pub max_hum: u8,
    pub fan_mode: u8,
}

impl TStatVacation {
    pub const LEN: usize = 1 + 2 + 1 + 1 + 1 + 1 + 1;

    pub fn is_active(&self) -> bool {
        self.active != 0
    }
}

impl Table for TStatVacation {
    const ADDR: TableAddr = super::constants::ADDR_TSTAT_VACATION;

    fn decode(record: &[u8]) -> Result<Self, EngineError> {
        require_len(record, Self::LEN)?;
        Ok(TStatVacation {
            active: record[0],
            hours: u16::from_be_bytes([record[1], record[2]]),
            min_temp: record[3],
            max_temp: record[4],
            min_hum: record[5],
            max_hum: record[6],
            fan_mode: record[7],
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.push(self.active);
        out.extend_from_slice(&self.hours.to_be_bytes());
        out.push(self.min_temp);
        out.push(self.max_temp);
        out.push(self.min_hum);
        out.push(self.max_hum);
        out.push(self.fan_mode);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TStatSettings {
    pub backlight: u8,
    pub auto_mode: u8,
    pub dead_band: u8,
    pub cycles_per_hour: u8,
    pub schedule_periods: u8,
    pub programs_enabled: u8,
    pub temp_units: u8,
    pub dealer_name: String,
    pub dealer_phone: String,
}

impl TStatSettings {
    pub const LEN: usize = 9 + 20 + 20;
}

impl Table for TStatSettings {
    const ADDR: TableAddr = super::constants::ADDR_TSTAT_SETTINGS;

    fn decode(record: &[u8]) -> Result<Self, EngineError> {
        require_len(record, Self::LEN)?;
        let dealer_name = String::from_utf8_lossy(&record[9..29]).trim_end_matches('\0').trim().to_string();
        let dealer_phone = String::from_utf8_lossy(&record[29..49]).trim_end_matches('\0').trim().to_string();
        Ok(TStatSettings {
            backlight: record[0],
            auto_mode: record[1],
            dead_band: record[3],
            cycles_per_hour: record[4],
            schedule_periods: record[5],
            programs_enabled: record[6],
            temp_units: record[7],
            dealer_name,
            dealer_phone,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.push(self.backlight);
        out.push(self.auto_mode);
        out.push(0);
        out.push(self.dead_band);
        out.push(self.cycles_per_hour);
        out.push(self.schedule_periods);
        out.push(self.programs_enabled);
        out.push(self.temp_units);
        out.push(0);
        let mut name = self.dealer_name.as_bytes().to_vec();
        name.resize(20, 0);
        out.extend_from_slice(&name);
        let mut phone = self.dealer_phone.as_bytes().to_vec();
        phone.resize(20, 0);
        out.extend_from_slice(&phone);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Damper {
    pub positions: [u8; 8],
}

impl Damper {
    pub const LEN: usize = 8;
    pub const ABSENT: u8 = 0xFF;
}

impl Table for Damper {
    const ADDR: TableAddr = super::constants::ADDR_DAMPER;

    fn decode(record: &[u8]) -> Result<Self, EngineError> {
        require_len(record, Self::LEN)?;
        let mut positions = [0u8; 8];
        positions.copy_from_slice(&record[0..8]);
        Ok(Damper { positions })
    }

    fn encode(&self) -> Vec<u8> {
        self.positions.to_vec()
    }
}

/// Write-flag bits shared across zone-indexed table writes (§3).
pub mod write_flags {
    pub const FAN_MODE: u8 = 1 << 0;
    pub const HOLD: u8 = 1 << 1;
    pub const HEAT_SETPOINT: u8 = 1 << 2;
    pub const COOL_SETPOINT: u8 = 1 << 3;
    pub const MODE: u8 = 1 << 4;

    /// Write-flag bits for TStatVacation writes: one bit per field, set only
    /// for fields actually present in the request (§6). The device ignores
    /// any field whose bit isn't set.
    pub mod vacation {
        pub const ACTIVE: u8 = 1 << 0;
        pub const HOURS: u8 = 1 << 1;
        pub const MIN_TEMP: u8 = 1 << 2;
        pub const MAX_TEMP: u8 = 1 << 3;
        pub const MIN_HUM: u8 = 1 << 4;
        pub const MAX_HUM: u8 = 1 << 5;
        pub const FAN_MODE: u8 = 1 << 6;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trip_on_ui_subset() {
        for raw in [0u8, 1, 2, 5] {
            let mode = Mode::from_raw(raw).unwrap();
            let s = mode.as_str_ui();
            let back = Mode::from_str_ui(s);
            if matches!(mode, Mode::Heat | Mode::Cool | Mode::Auto | Mode::Off) {
                assert_eq!(back.unwrap().to_raw(), raw);
            }
        }
    }

    #[test]
    fn action_from_stage_boundaries() {
        assert_eq!(Action::from_stage(0), Action::Idle);
        assert_eq!(Action::from_stage(1), Action::Cooling);
        assert_eq!(Action::from_stage(2), Action::Cooling);
        assert_eq!(Action::from_stage(3), Action::Heating);
        assert_eq!(Action::from_stage(7), Action::Heating);
    }

    #[test]
    fn tstat_current_round_trip() {
        let rec = TStatCurrent {
            zone_temps: [70, 71, 72, 73, 74, 75, 76, 77],
            zone_humidities: [40; 8],
            outdoor_air_temp: 55,
            zone_unocc: 0,
            mode_raw: 0x21, // mode=auto(2) | stage=1
            displayed_zone: 1,
        };
        let bytes = rec.encode();
        assert_eq!(bytes.len(), TStatCurrent::LEN);
        let decoded = TStatCurrent::decode(&bytes).unwrap();
        assert_eq!(decoded, rec);
        assert_eq!(decoded.mode().unwrap(), Mode::Auto);
        assert_eq!(decoded.stage(), 1);
    }

    #[test]
    fn zone_hold_mask_bits() {
        let mut zone = TStatZone {
            fan_mode: [0; 8],
            zone_hold: 0,
            heat_setpoint: [68; 8],
            cool_setpoint: [76; 8],
            target_humidity: [40; 8],
            fan_auto_cfg: 0,
            override_duration: [0; 8],
            zone_names: Default::default(),
        };
        zone.zone_hold = 0b0000_0101; // zones 1 and 3 held
        assert!(zone.is_held(1));
        assert!(!zone.is_held(2));
        assert!(zone.is_held(3));
        assert!(!zone.is_held(4));
    }

    #[test]
    fn damper_absent_marker() {
        let damper = Damper { positions: [8, 0xFF, 4, 0xFF, 0, 0, 0, 0] };
        let bytes = damper.encode();
        let decoded = Damper::decode(&bytes).unwrap();
        assert_eq!(decoded.positions[1], Damper::ABSENT);
    }
}
