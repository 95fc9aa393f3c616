//! Background polling loops and snoop glue: the pieces that keep the two
//! caches current without any caller having to ask for anything.

use crate::cache::Cache;
use crate::models::{AirHandlerStatus, CacheValue, DamperStatus, HeatPumpStatus, VacationConfig, ZoneConfig, ZonesConfig};
use crate::protocol::broker::BrokerHandle;
use crate::protocol::constants::{
    ADDR_AIRHANDLER_BLOWER, ADDR_AIRHANDLER_STATUS, ADDR_HEATPUMP_STAGE, ADDR_HEATPUMP_TEMPS,
    AIRHANDLER_RANGE, HEATPUMP_RANGE, OP_READ, SAM_ADDR, THERMOSTAT_ADDR, TableAddr, ZONEDAMPER_RANGE,
};
use crate::protocol::frame::Frame;
use crate::protocol::snoop::SnoopRegistry;
use crate::protocol::tables::{read_table, Damper, Table, TStatCurrent, TStatVacation, TStatZone};
use log::{debug, info};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const STATE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const STATS_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Bytes preceding a snooped RESPONSE frame's field data: the table address
/// alone (§4.4). Unlike our own table reads (`tables::read_table`, which
/// strip a 6-byte dst-echo+address+flags leader), unsolicited snoop frames
/// carry only the bare 3-byte table address before the fields — the offsets
/// below are payload-relative, not record-relative.
const SNOOP_HEADER_LEN: usize = 3;

/// Relative contribution of each of the 8 zones to total system airflow,
/// used to turn raw damper positions into normalized flow weights. Fixed
/// for the process lifetime; equal weighting until a per-install config
/// surface exists.
#[derive(Debug, Clone, Copy)]
pub struct ZoneWeights(pub [f32; 8]);



impl ZoneWeights {
    pub fn equal() -> ZoneWeights {
        ZoneWeights([1.0; 8])
    }
}

/// Stabilizes the flow-weight denominator against a system with every
/// damper closed, and accounts for duct leakage not attributable to any
/// zone.
const LEAKAGE: f32 = 0.05;

/// Poll `TStatZone`/`TStatCurrent` and `TStatVacation` at 1Hz, publishing a
/// structured snapshot to `ws_cache` and a flat set of scalar keys to
/// `mqtt_cache`. Also round-robins one diagnostic raw READ per tick across
/// `raw_monitor`, if non-empty. Blocks forever; run as the body of a
/// dedicated thread.
pub fn run_state_poller(
    broker: BrokerHandle,
    ws_cache: Arc<Cache>,
    mqtt_cache: Arc<Cache>,
    raw_monitor: Vec<TableAddr>,
) {
    let mut raw_cursor = 0usize;
    loop {
        let vacation = read_table::<TStatVacation>(&broker);
        if let Some(vacation) = &vacation {
            publish_vacation(vacation, &ws_cache, &mqtt_cache);
        }
        if let (Some(zones), Some(current)) =
            (read_table::<TStatZone>(&broker), read_table::<TStatCurrent>(&broker))
        {
            let vacation_active = vacation.map(|v| v.is_active()).unwrap_or(false);
            publish_zones(&zones, &current, vacation_active, &ws_cache, &mqtt_cache);
        }
        if !raw_monitor.is_empty() {
            poll_one_raw_table(&broker, raw_monitor[raw_cursor], &ws_cache);
            raw_cursor = (raw_cursor + 1) % raw_monitor.len();
        }
        thread::sleep(STATE_POLL_INTERVAL);
    }
}

fn poll_one_raw_table(broker: &BrokerHandle, addr: TableAddr, ws_cache: &Cache) {
    let Ok(request) = Frame::new(THERMOSTAT_ADDR, SAM_ADDR, OP_READ, addr.to_vec()) else { return };
    let Some(response) = broker.submit(request) else {
        debug!("raw monitor read of {addr:02x?} timed out");
        return;
    };
    let key = format!("raw/{:02x}{:02x}{:02x}", addr[0], addr[1], addr[2]);
    ws_cache.update(key, CacheValue::Scalar(response.payload.into()));
}

/// Log and reset the broker's transaction counters every 15s.
pub fn run_stats_poller(broker: BrokerHandle) {
    loop {
        thread::sleep(STATS_POLL_INTERVAL);
        let snapshot = broker.stats_snapshot_and_reset();
        info!("broker stats (last 15s): {snapshot:?}");
    }
}

fn publish_zones(
    zones: &TStatZone,
    current: &TStatCurrent,
    vacation_active: bool,
    ws_cache: &Cache,
    mqtt_cache: &Cache,
) {
    let mode = current.mode().unwrap_or(crate::protocol::tables::Mode::Off);
    let stage = current.stage();
    let action = current.action();

    let mut configs = Vec::with_capacity(8);
    for i in 0..8usize {
        let zone_id = (i + 1) as u8;
        let name = zones.zone_names[i].clone();
        let enabled = !name.is_empty();
        let fan_mode = crate::protocol::tables::FanMode::from_raw(zones.fan_mode[i])
            .unwrap_or(crate::protocol::tables::FanMode::Auto);
        let hold = zones.is_held(zone_id);

        let zone = ZoneConfig {
            zone_id,
            name,
            current_temp: current.zone_temps[i],
            current_humidity: current.zone_humidities[i],
            heat_setpoint: zones.heat_setpoint[i],
            cool_setpoint: zones.cool_setpoint[i],
            target_humidity: zones.target_humidity[i],
            fan_mode,
            hold,
            preset: if vacation_active {
                "vacation".to_string()
            } else if hold {
                "hold".to_string()
            } else {
                "none".to_string()
            },
            override_duration_minutes: zones.override_duration[i],
            enabled,
        };

        if enabled {
            let prefix = format!("mqtt/infinitive/zone/{zone_id}");
            mqtt_cache.update(format!("{prefix}/currentTemp"), CacheValue::Scalar(zone.current_temp.into()));
            mqtt_cache.update(format!("{prefix}/currentHumidity"), CacheValue::Scalar(zone.current_humidity.into()));
            mqtt_cache.update(format!("{prefix}/heatSetpoint"), CacheValue::Scalar(zone.heat_setpoint.into()));
            mqtt_cache.update(format!("{prefix}/coolSetpoint"), CacheValue::Scalar(zone.cool_setpoint.into()));
            mqtt_cache.update(format!("{prefix}/targetHumidity"), CacheValue::Scalar(zone.target_humidity.into()));
            mqtt_cache.update(format!("{prefix}/fanMode"), CacheValue::Scalar(zone.fan_mode.to_raw().into()));
            mqtt_cache.update(format!("{prefix}/hold"), CacheValue::Scalar(zone.hold.into()));
            mqtt_cache.update(
                format!("{prefix}/overrideDuration"),
                CacheValue::Scalar(zone.override_duration_minutes.into()),
            );
        }

        configs.push(zone);
    }

    mqtt_cache.update("mqtt/infinitive/mode", CacheValue::Scalar(mode.as_str_ui().into()));
    mqtt_cache.update("mqtt/infinitive/stage", CacheValue::Scalar(stage.into()));
    mqtt_cache.update("mqtt/infinitive/outdoorTemp", CacheValue::Scalar(current.outdoor_air_temp.into()));

    ws_cache.update(
        "tstat",
        CacheValue::Zones(ZonesConfig { zones: configs, mode, stage, action, outdoor_temp: current.outdoor_air_temp }),
    );
}

fn publish_vacation(vacation: &TStatVacation, ws_cache: &Cache, mqtt_cache: &Cache) {
    let fan_mode = crate::protocol::tables::FanMode::from_raw(vacation.fan_mode)
        .unwrap_or(crate::protocol::tables::FanMode::Auto);
    let config = VacationConfig {
        active: vacation.is_active(),
        hours: vacation.hours,
        min_temp: vacation.min_temp,
        max_temp: vacation.max_temp,
        min_humidity: vacation.min_hum,
        max_humidity: vacation.max_hum,
        fan_mode,
    };

    mqtt_cache.update("mqtt/infinitive/vacation/active", CacheValue::Scalar(config.active.into()));
    mqtt_cache.update("mqtt/infinitive/vacation/hours", CacheValue::Scalar(config.hours.into()));
    mqtt_cache.update("mqtt/infinitive/vacation/minTemp", CacheValue::Scalar(config.min_temp.into()));
    mqtt_cache.update("mqtt/infinitive/vacation/maxTemp", CacheValue::Scalar(config.max_temp.into()));
    mqtt_cache.update("mqtt/infinitive/vacation/minHumidity", CacheValue::Scalar(config.min_humidity.into()));
    mqtt_cache.update("mqtt/infinitive/vacation/maxHumidity", CacheValue::Scalar(config.max_humidity.into()));

    ws_cache.update("vacation", CacheValue::Vacation(config));
}

/// Register the three snoop observers (heat pump, air handler, zone
/// damper) against `registry`. Must run before the frame reader thread
/// starts, since `SnoopRegistry::register` takes `&mut self`.
pub fn register_snoops(registry: &mut SnoopRegistry, ws_cache: Arc<Cache>, mqtt_cache: Arc<Cache>, zone_weights: ZoneWeights) {
    let heatpump_state = Arc::new(Mutex::new(HeatPumpStatus { coil_temp: 0.0, outside_temp: 0.0, stage: 0 }));
    let ws = ws_cache.clone();
    let mqtt = mqtt_cache.clone();
    registry.register(
        HEATPUMP_RANGE.0,
        HEATPUMP_RANGE.1,
        Arc::new(move |frame: &Frame| decode_heatpump(frame, &heatpump_state, &ws, &mqtt)),
    );

    let airhandler_state = Arc::new(Mutex::new(AirHandlerStatus {
        blower_rpm: 0,
        heat_stage: 0,
        airflow_cfm: 0,
        static_pressure: 0.0,
        elec_heat: false,
        action: "idle",
    }));
    let ws = ws_cache.clone();
    let mqtt = mqtt_cache.clone();
    registry.register(
        AIRHANDLER_RANGE.0,
        AIRHANDLER_RANGE.1,
        Arc::new(move |frame: &Frame| decode_airhandler(frame, &airhandler_state, &ws, &mqtt)),
    );

    registry.register(
        ZONEDAMPER_RANGE.0,
        ZONEDAMPER_RANGE.1,
        Arc::new(move |frame: &Frame| decode_damper(frame, zone_weights, &ws_cache, &mqtt_cache)),
    );
}

fn table_addr(payload: &[u8]) -> Option<[u8; 3]> {
    if payload.len() < 3 {
        return None;
    }
    Some([payload[0], payload[1], payload[2]])
}

fn decode_heatpump(frame: &Frame, state: &Mutex<HeatPumpStatus>, ws_cache: &Cache, mqtt_cache: &Cache) {
    let Some(addr) = table_addr(&frame.payload) else { return };
    let payload = &frame.payload;

    let mut status = state.lock().unwrap();
    if addr == ADDR_HEATPUMP_TEMPS && payload.len() >= 7 {
        // u16 at [5:7] and [3:5], sixteenths of a degree Fahrenheit (§4.4).
        status.coil_temp = u16::from_be_bytes([payload[5], payload[6]]) as f32 / 16.0;
        status.outside_temp = u16::from_be_bytes([payload[3], payload[4]]) as f32 / 16.0;
    } else if addr == ADDR_HEATPUMP_STAGE && payload.len() > SNOOP_HEADER_LEN {
        status.stage = payload[3] >> 1;
    } else {
        return;
    }
    let snapshot = *status;
    drop(status);

    ws_cache.update("heatpump", CacheValue::HeatPump(snapshot));
    mqtt_cache.update("mqtt/infinitive/heatpump/coilTemp", CacheValue::Scalar(snapshot.coil_temp.into()));
    mqtt_cache.update("mqtt/infinitive/heatpump/outsideTemp", CacheValue::Scalar(snapshot.outside_temp.into()));
    mqtt_cache.update("mqtt/infinitive/heatpump/stage", CacheValue::Scalar(snapshot.stage.into()));
}

fn decode_airhandler(frame: &Frame, state: &Mutex<AirHandlerStatus>, ws_cache: &Cache, mqtt_cache: &Cache) {
    let Some(addr) = table_addr(&frame.payload) else { return };
    let payload = &frame.payload;

    let mut status = state.lock().unwrap();
    if addr == ADDR_AIRHANDLER_BLOWER && payload.len() >= 6 {
        status.blower_rpm = u16::from_be_bytes([payload[4], payload[5]]);
    } else if addr == ADDR_AIRHANDLER_STATUS && payload.len() >= 12 {
        status.heat_stage = payload[3];
        status.airflow_cfm = u16::from_be_bytes([payload[7], payload[8]]);
        let pressure_raw = u16::from_be_bytes([payload[10], payload[11]]);
        // Three-decimal-place fixed point: raw/65536, rounded to 4 places
        // before the final /10000 to land on exactly 3 significant decimals.
        status.static_pressure = (pressure_raw as f32 / 65536.0 * 10000.0).round() / 10000.0;
        status.elec_heat = (payload[3] & 0x03) != 0;
        status.action = if payload[5] & 0x03 != 0 {
            "cooling"
        } else if payload[3] & 0x03 != 0 {
            "heating"
        } else {
            "idle"
        };
    } else {
        return;
    }
    let snapshot = *status;
    drop(status);

    ws_cache.update("blower", CacheValue::AirHandler(snapshot));
    mqtt_cache.update("mqtt/infinitive/airhandler/blowerRpm", CacheValue::Scalar(snapshot.blower_rpm.into()));
    mqtt_cache.update("mqtt/infinitive/airhandler/airflowCfm", CacheValue::Scalar(snapshot.airflow_cfm.into()));
    mqtt_cache.update("mqtt/infinitive/airhandler/staticPressure", CacheValue::Scalar(snapshot.static_pressure.into()));
    mqtt_cache.update("mqtt/infinitive/airhandler/elecHeat", CacheValue::Scalar(snapshot.elec_heat.into()));
    mqtt_cache.update("mqtt/infinitive/airhandler/action", CacheValue::Scalar(snapshot.action.into()));
}

fn decode_damper(frame: &Frame, zone_weights: ZoneWeights, ws_cache: &Cache, mqtt_cache: &Cache) {
    if frame.payload.len() < SNOOP_HEADER_LEN {
        return;
    }
    let Ok(damper) = Damper::decode(&frame.payload[SNOOP_HEADER_LEN..]) else { return };

    let total: f32 = damper
        .positions
        .iter()
        .enumerate()
        .filter(|(_, &p)| p != Damper::ABSENT)
        .map(|(i, &p)| zone_weights.0[i] * p as f32)
        .sum();

    let mut positions = [None; 8];
    let mut flow_weights = [None; 8];
    for (i, &p) in damper.positions.iter().enumerate() {
        if p == Damper::ABSENT {
            continue;
        }
        // Raw positions are on a 0-15 scale; publish as a 0-100 percentage.
        let pct = p as f32 * 100.0 / 15.0;
        positions[i] = Some(pct);
        let weight = zone_weights.0[i] * p as f32 / (total + LEAKAGE);
        flow_weights[i] = Some(weight);

        let zone_id = i + 1;
        mqtt_cache.update(format!("mqtt/infinitive/zone/{zone_id}/damperPosition"), CacheValue::Scalar(pct.into()));
        mqtt_cache.update(format!("mqtt/infinitive/zone/{zone_id}/flowWeight"), CacheValue::Scalar(weight.into()));
    }

    ws_cache.update("damperpos", CacheValue::Damper(DamperStatus { positions, flow_weights }));
}
