mod app;
mod cache;
mod config;
mod dispatcher;
mod error;
mod http;
mod models;
mod mqtt;
mod pollers;
mod protocol;
mod responselog;

use app::AppContext;
use cache::Cache;
use clap::Parser;
use config::Config;
use dispatcher::Dispatcher;
use log::info;
use models::CacheValue;
use mqtt::MqttCommand;
use pollers::ZoneWeights;
use protocol::broker::{Broker, BrokerHandle};
use protocol::reader::FrameReader;
use protocol::serial::SerialIo;
use protocol::snoop::SnoopRegistry;
use protocol::tables::{self, write_flags, FanMode, TStatVacation, TStatZone};
use responselog::ResponseLog;
use std::sync::{Arc, Mutex};
use std::thread;

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(if config.debug { log::LevelFilter::Debug } else { log::LevelFilter::Info });
    builder.init();

    info!("starting infinitive-bridge v{}", env!("CARGO_PKG_VERSION"));

    let mut serial = SerialIo::new(&config.serial);
    serial.open_or_panic();
    let serial = Arc::new(Mutex::new(serial));

    let broker = Broker::new(serial.clone());
    let broker_handle = broker.handle();
    thread::spawn(move || broker.run());

    let dispatcher = Dispatcher::new();
    let dispatcher_handle = dispatcher.handle();
    let mqtt_slot = dispatcher.mqtt_slot();
    thread::spawn(move || dispatcher.run());

    let ws_dispatcher = dispatcher_handle.clone();
    let ws_cache = Arc::new(Cache::new(
        "ws",
        Arc::new(move |key: &str, value: &CacheValue| {
            if let Ok(json) = serde_json::to_value(value) {
                ws_dispatcher.broadcast_event(key.to_string(), json);
            }
        }),
    ));

    let mqtt_dispatcher = dispatcher_handle.clone();
    let mqtt_cache = Arc::new(Cache::new(
        "mqtt",
        Arc::new(move |key: &str, value: &CacheValue| {
            if let Ok(json) = serde_json::to_value(value) {
                mqtt_dispatcher.broadcast_event(format!("mqtt/{key}"), json);
            }
        }),
    ));

    let response_log = config.response_log.as_deref().map(ResponseLog::open_or_panic);
    let mut snoops = SnoopRegistry::new();
    pollers::register_snoops(&mut snoops, ws_cache.clone(), mqtt_cache.clone(), ZoneWeights::equal());

    let reader = FrameReader::new(serial, broker_handle.clone(), Arc::new(snoops), response_log);
    thread::spawn(move || reader.run());

    {
        let broker_handle = broker_handle.clone();
        thread::spawn(move || pollers::run_stats_poller(broker_handle));
    }
    let raw_monitor: Vec<_> = config
        .raw_monitor
        .iter()
        .filter_map(|s| match protocol::constants::parse_table_addr_hex(s) {
            Some(addr) => Some(addr),
            None => {
                log::warn!("ignoring malformed --raw-monitor address: {s}");
                None
            }
        })
        .collect();
    {
        let broker_handle = broker_handle.clone();
        let ws_cache = ws_cache.clone();
        let mqtt_cache = mqtt_cache.clone();
        thread::spawn(move || pollers::run_state_poller(broker_handle, ws_cache, mqtt_cache, raw_monitor));
    }

    let mqtt_handle = if let Some(host) = config.mqtt_host.clone() {
        let broker_for_cmd = broker_handle.clone();
        let handle = mqtt::connect(
            &host,
            config.mqtt_port,
            &config.mqtt_client_id,
            config.mqtt_username.as_deref(),
            config.mqtt_password().as_deref(),
            move |command| apply_mqtt_command(command, &broker_for_cmd),
            {
                let mqtt_cache = mqtt_cache.clone();
                move |handle| {
                    mqtt_cache.clear();
                    handle.publish_ha_available(true);
                    publish_ha_discovery(handle);
                }
            },
        );
        *mqtt_slot.lock().unwrap() = Some(handle.clone());
        Some(handle)
    } else {
        None
    };

    let context = Arc::new(AppContext {
        broker: broker_handle,
        ws_cache,
        mqtt_cache,
        dispatcher: dispatcher_handle,
        mqtt: mqtt_handle,
    });

    let rocket_config = rocket::Config { port: config.http_port, ..rocket::Config::default() };
    rocket::custom(rocket_config)
        .manage(context)
        .mount(
            "/",
            rocket::routes![
                http::routes::tstat_settings,
                http::routes::zones_config,
                http::routes::zone_config,
                http::routes::put_zone_config,
                http::routes::airhandler,
                http::routes::heatpump,
                http::routes::vacation,
                http::routes::put_vacation,
                http::routes::raw_table,
                http::ws::ws,
            ],
        )
        .launch()
        .await?;

    Ok(())
}

/// Every Home Assistant discovery document we know how to publish, fired
/// once per (re)connection per §6.
fn publish_ha_discovery(handle: &mqtt::MqttHandle) {
    for zone in 1..=8u8 {
        handle.publish_ha_climate_discovery(zone, &format!("Zone {zone}"));
        handle.publish_ha_sensor_discovery(
            &format!("infinitive_zone_{zone}_damper_position"),
            &format!("Zone {zone} Damper Position"),
            &format!("mqtt/infinitive/zone/{zone}/damperPosition"),
            Some("%"),
        );
        handle.publish_ha_sensor_discovery(
            &format!("infinitive_zone_{zone}_flow_weight"),
            &format!("Zone {zone} Flow Weight"),
            &format!("mqtt/infinitive/zone/{zone}/flowWeight"),
            None,
        );
        handle.publish_ha_sensor_discovery(
            &format!("infinitive_zone_{zone}_humidity"),
            &format!("Zone {zone} Humidity"),
            &format!("mqtt/infinitive/zone/{zone}/currentHumidity"),
            Some("%"),
        );
        handle.publish_ha_sensor_discovery(
            &format!("infinitive_zone_{zone}_override_duration"),
            &format!("Zone {zone} Override Duration"),
            &format!("mqtt/infinitive/zone/{zone}/overrideDuration"),
            Some("min"),
        );
    }

    handle.publish_ha_sensor_discovery(
        "infinitive_outdoor_temp",
        "Outdoor Temperature",
        "mqtt/infinitive/outdoorTemp",
        Some("°F"),
    );
    handle.publish_ha_sensor_discovery("infinitive_stage", "System Stage", "mqtt/infinitive/stage", None);
    handle.publish_ha_sensor_discovery(
        "infinitive_heatpump_coil_temp",
        "Heat Pump Coil Temperature",
        "mqtt/infinitive/heatpump/coilTemp",
        Some("°F"),
    );
    handle.publish_ha_sensor_discovery(
        "infinitive_heatpump_outside_temp",
        "Heat Pump Outside Temperature",
        "mqtt/infinitive/heatpump/outsideTemp",
        Some("°F"),
    );
    handle.publish_ha_sensor_discovery(
        "infinitive_airhandler_blower_rpm",
        "Blower RPM",
        "mqtt/infinitive/airhandler/blowerRpm",
        Some("rpm"),
    );
    handle.publish_ha_sensor_discovery(
        "infinitive_airhandler_airflow_cfm",
        "Airflow",
        "mqtt/infinitive/airhandler/airflowCfm",
        Some("cfm"),
    );
    handle.publish_ha_sensor_discovery(
        "infinitive_airhandler_static_pressure",
        "Static Pressure",
        "mqtt/infinitive/airhandler/staticPressure",
        Some("inWC"),
    );
    handle.publish_ha_sensor_discovery(
        "infinitive_airhandler_action",
        "System Action",
        "mqtt/infinitive/airhandler/action",
        None,
    );
    handle.publish_ha_sensor_discovery(
        "infinitive_vacation_active",
        "Vacation Mode",
        "mqtt/infinitive/vacation/active",
        None,
    );
    handle.publish_ha_sensor_discovery(
        "infinitive_vacation_hours",
        "Vacation Hours Remaining",
        "mqtt/infinitive/vacation/hours",
        Some("h"),
    );
    handle.publish_ha_sensor_discovery(
        "infinitive_vacation_min_temp",
        "Vacation Min Temperature",
        "mqtt/infinitive/vacation/minTemp",
        Some("°F"),
    );
    handle.publish_ha_sensor_discovery(
        "infinitive_vacation_max_temp",
        "Vacation Max Temperature",
        "mqtt/infinitive/vacation/maxTemp",
        Some("°F"),
    );
}

/// Apply a parsed MQTT `.../set` command to the bus. Mirrors the write path
/// of the HTTP PUT handlers, since both ultimately mutate the same tables.
fn apply_mqtt_command(command: MqttCommand, broker: &BrokerHandle) {
    match command {
        MqttCommand::Zone { zone, key, value } => apply_zone_command(broker, zone, &key, &value),
        MqttCommand::Vacation { key, value } => apply_vacation_command(broker, &key, &value),
        MqttCommand::Global { key, value } => {
            info!("ignoring unsupported global mqtt command {key}={value}");
        }
    }
}

fn apply_zone_command(broker: &BrokerHandle, zone: u8, key: &str, value: &str) {
    if !(1..=8).contains(&zone) {
        return;
    }
    if key == "mode" {
        let Some(mode) = parse_mode(value) else { return };
        let Some(mut current) = tables::read_table::<tables::TStatCurrent>(broker) else { return };
        current.mode_raw = (current.mode_raw & !0x0F) | mode.to_raw();
        tables::write_table(broker, zone, write_flags::MODE, &current);
        return;
    }
    let Some(mut table) = tables::read_table::<TStatZone>(broker) else { return };
    let idx = (zone - 1) as usize;
    let flags = match key {
        "fanMode" => match parse_fan_mode(value) {
            Some(fan_mode) => {
                table.fan_mode[idx] = fan_mode.to_raw();
                write_flags::FAN_MODE
            }
            None => return,
        },
        "hold" => {
            let hold = value == "true" || value == "1";
            table.zone_hold = if hold { table.zone_hold | (1 << idx) } else { table.zone_hold & !(1 << idx) };
            write_flags::HOLD
        }
        "heatSetpoint" => match value.parse::<u8>() {
            Ok(v) => {
                table.heat_setpoint[idx] = v;
                write_flags::HEAT_SETPOINT
            }
            Err(_) => return,
        },
        "coolSetpoint" => match value.parse::<u8>() {
            Ok(v) => {
                table.cool_setpoint[idx] = v;
                write_flags::COOL_SETPOINT
            }
            Err(_) => return,
        },
        _ => return,
    };
    tables::write_table(broker, zone, flags, &table);
}

fn apply_vacation_command(broker: &BrokerHandle, key: &str, value: &str) {
    use tables::write_flags::vacation as vacation_flags;

    let Some(mut table) = tables::read_table::<TStatVacation>(broker) else { return };
    let flags = match key {
        "active" => {
            table.active = if value == "true" || value == "1" { 1 } else { 0 };
            vacation_flags::ACTIVE
        }
        "hours" => {
            let Ok(v) = value.parse() else { return };
            table.hours = v;
            vacation_flags::HOURS
        }
        "minTemp" => {
            let Ok(v) = value.parse() else { return };
            table.min_temp = v;
            vacation_flags::MIN_TEMP
        }
        "maxTemp" => {
            let Ok(v) = value.parse() else { return };
            table.max_temp = v;
            vacation_flags::MAX_TEMP
        }
        "minHumidity" => {
            let Ok(v) = value.parse() else { return };
            table.min_hum = v;
            vacation_flags::MIN_HUM
        }
        "maxHumidity" => {
            let Ok(v) = value.parse() else { return };
            table.max_hum = v;
            vacation_flags::MAX_HUM
        }
        "fanMode" => match parse_fan_mode(value) {
            Some(fan_mode) => {
                table.fan_mode = fan_mode.to_raw();
                vacation_flags::FAN_MODE
            }
            None => return,
        },
        _ => return,
    };
    tables::write_table(broker, 0, flags, &table);
}

fn parse_fan_mode(s: &str) -> Option<FanMode> {
    match s {
        "auto" => Some(FanMode::Auto),
        "low" => Some(FanMode::Low),
        "med" => Some(FanMode::Med),
        "high" => Some(FanMode::High),
        _ => None,
    }
}

fn parse_mode(s: &str) -> Option<tables::Mode> {
    tables::Mode::from_str_ui(s)
}
