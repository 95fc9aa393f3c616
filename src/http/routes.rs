//! REST surface: thin handlers over the typed table layer and the caches.
//! Reads answer from `ws_cache` when a poller already keeps it current;
//! settings and vacation reads go straight to the bus since nothing else
//! polls them.

use crate::app::AppContext;
use crate::models::{CacheValue, ZoneConfig};
use crate::protocol::constants::{OP_READ, SAM_ADDR};
use crate::protocol::frame::Frame;
use crate::protocol::tables::{self, write_flags, FanMode, Mode, TStatCurrent, TStatSettings, TStatVacation, TStatZone};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, put};
use rocket::State;
use serde::Deserialize;
use std::sync::Arc;

fn parse_fan_mode(s: &str) -> Option<FanMode> {
    match s {
        "auto" => Some(FanMode::Auto),
        "low" => Some(FanMode::Low),
        "med" => Some(FanMode::Med),
        "high" => Some(FanMode::High),
        _ => None,
    }
}

#[get("/api/tstat/settings")]
pub fn tstat_settings(app: &State<Arc<AppContext>>) -> Result<Json<TStatSettings>, Status> {
    tables::read_table::<TStatSettings>(&app.broker).map(Json).ok_or(Status::GatewayTimeout)
}

#[get("/api/zones/config")]
pub fn zones_config(app: &State<Arc<AppContext>>) -> Result<Json<CacheValue>, Status> {
    app.ws_cache.get("tstat").map(Json).ok_or(Status::ServiceUnavailable)
}

#[get("/api/zone/<zone>/config")]
pub fn zone_config(app: &State<Arc<AppContext>>, zone: u8) -> Result<Json<ZoneConfig>, Status> {
    match app.ws_cache.get("tstat") {
        Some(CacheValue::Zones(zones)) => {
            zones.zones.into_iter().find(|z| z.zone_id == zone).map(Json).ok_or(Status::NotFound)
        }
        Some(_) => Err(Status::ServiceUnavailable),
        None => Err(Status::ServiceUnavailable),
    }
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct ZoneConfigUpdate {
    pub mode: Option<String>,
    pub fan_mode: Option<String>,
    pub hold: Option<bool>,
    pub heat_setpoint: Option<u8>,
    pub cool_setpoint: Option<u8>,
}

#[put("/api/zone/<zone>/config", data = "<body>")]
pub fn put_zone_config(app: &State<Arc<AppContext>>, zone: u8, body: Json<ZoneConfigUpdate>) -> Status {
    if !(1..=8).contains(&zone) {
        return Status::BadRequest;
    }
    let idx = (zone - 1) as usize;
    let mut wrote_anything = false;

    // `mode` lives in TStatCurrent, not TStatZone, and is written separately.
    if let Some(mode) = body.mode.as_deref().and_then(Mode::from_str_ui) {
        let Some(mut current) = tables::read_table::<TStatCurrent>(&app.broker) else {
            return Status::GatewayTimeout;
        };
        current.mode_raw = (current.mode_raw & !0x0F) | mode.to_raw();
        if !tables::write_table(&app.broker, zone, write_flags::MODE, &current) {
            return Status::GatewayTimeout;
        }
        wrote_anything = true;
    }

    let mut flags = 0u8;
    let has_zone_fields =
        body.fan_mode.is_some() || body.hold.is_some() || body.heat_setpoint.is_some() || body.cool_setpoint.is_some();
    if has_zone_fields {
        let Some(mut table) = tables::read_table::<TStatZone>(&app.broker) else {
            return Status::GatewayTimeout;
        };

        if let Some(fan_mode) = body.fan_mode.as_deref().and_then(parse_fan_mode) {
            table.fan_mode[idx] = fan_mode.to_raw();
            flags |= write_flags::FAN_MODE;
        }
        if let Some(hold) = body.hold {
            table.zone_hold =
                if hold { table.zone_hold | (1 << idx) } else { table.zone_hold & !(1 << idx) };
            flags |= write_flags::HOLD;
        }
        if let Some(heat) = body.heat_setpoint {
            table.heat_setpoint[idx] = heat;
            flags |= write_flags::HEAT_SETPOINT;
        }
        if let Some(cool) = body.cool_setpoint {
            table.cool_setpoint[idx] = cool;
            flags |= write_flags::COOL_SETPOINT;
        }

        if flags != 0 {
            if !tables::write_table(&app.broker, zone, flags, &table) {
                return Status::GatewayTimeout;
            }
            wrote_anything = true;
        }
    }

    if wrote_anything {
        Status::NoContent
    } else {
        Status::BadRequest
    }
}

#[get("/api/airhandler")]
pub fn airhandler(app: &State<Arc<AppContext>>) -> Result<Json<CacheValue>, Status> {
    app.ws_cache.get("blower").map(Json).ok_or(Status::ServiceUnavailable)
}

#[get("/api/heatpump")]
pub fn heatpump(app: &State<Arc<AppContext>>) -> Result<Json<CacheValue>, Status> {
    app.ws_cache.get("heatpump").map(Json).ok_or(Status::ServiceUnavailable)
}

/// The system has exactly one vacation mode, addressed through zone 1 by
/// convention on the bus.
#[get("/api/zone/1/vacation")]
pub fn vacation(app: &State<Arc<AppContext>>) -> Result<Json<CacheValue>, Status> {
    app.ws_cache.get("vacation").map(Json).ok_or(Status::ServiceUnavailable)
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct VacationUpdate {
    pub active: Option<bool>,
    pub hours: Option<u16>,
    pub min_temp: Option<u8>,
    pub max_temp: Option<u8>,
    pub min_humidity: Option<u8>,
    pub max_humidity: Option<u8>,
    pub fan_mode: Option<String>,
}

#[put("/api/zone/1/vacation", data = "<body>")]
pub fn put_vacation(app: &State<Arc<AppContext>>, body: Json<VacationUpdate>) -> Status {
    let Some(mut table) = tables::read_table::<TStatVacation>(&app.broker) else {
        return Status::GatewayTimeout;
    };
    let mut flags = 0u8;

    if let Some(active) = body.active {
        table.active = active as u8;
        flags |= write_flags::vacation::ACTIVE;
    }
    if let Some(hours) = body.hours {
        table.hours = hours;
        flags |= write_flags::vacation::HOURS;
    }
    if let Some(v) = body.min_temp {
        table.min_temp = v;
        flags |= write_flags::vacation::MIN_TEMP;
    }
    if let Some(v) = body.max_temp {
        table.max_temp = v;
        flags |= write_flags::vacation::MAX_TEMP;
    }
    if let Some(v) = body.min_humidity {
        table.min_hum = v;
        flags |= write_flags::vacation::MIN_HUM;
    }
    if let Some(v) = body.max_humidity {
        table.max_hum = v;
        flags |= write_flags::vacation::MAX_HUM;
    }
    if let Some(fan_mode) = body.fan_mode.as_deref().and_then(parse_fan_mode) {
        table.fan_mode = fan_mode.to_raw();
        flags |= write_flags::vacation::FAN_MODE;
    }

    if flags == 0 {
        return Status::BadRequest;
    }
    if tables::write_table(&app.broker, 0, flags, &table) {
        Status::NoContent
    } else {
        Status::GatewayTimeout
    }
}

/// Arbitrary table read, for diagnostics: `dev` is the 4-hex-digit bus
/// address, `addr` the 6-hex-digit table address.
#[get("/api/raw/<dev>/<addr>")]
pub fn raw_table(app: &State<Arc<AppContext>>, dev: &str, addr: &str) -> Result<Json<Vec<u8>>, Status> {
    let dev = u16::from_str_radix(dev, 16).map_err(|_| Status::BadRequest)?;
    let table_addr = crate::protocol::constants::parse_table_addr_hex(addr).ok_or(Status::BadRequest)?;

    let request = Frame::new(dev, SAM_ADDR, OP_READ, table_addr.to_vec()).map_err(|_| Status::BadRequest)?;
    let response = app.broker.submit(request).ok_or(Status::GatewayTimeout)?;
    Ok(Json(response.payload))
}
