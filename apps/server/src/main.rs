pub mod config;
pub mod store;
pub mod web;

use anyhow::{Context, Result};
use chrono::Local;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thermostat_core::{Notification, TickEffects, Zone};
use thermostat_protocol::protos::generated::telemetry::{
    RelayReport, SensorReport, SwitchReport, TelemetryMessage,
};
use thermostat_protocol::receiver::{ReportHandler, TelemetryListener};
use thermostat_protocol::relay::set_relay;

use crate::config::ServerConfig;
use crate::store::{load_schedules, StateStore};

/// A station that has not reported for this long is shown as unavailable.
pub const STALE_AFTER_SECS: i64 = 180;

/// One configured zone and its wiring to the stations that serve it.
pub struct ZoneRuntime {
    pub name: String,
    pub relay_addr: String,
    pub indoor_sensor: String,
    pub outdoor_sensor: String,
    pub window_switch: Option<String>,
    pub external_schedule: bool,
    pub zone: Mutex<Zone>,
}

pub struct ServerContext {
    pub zones: Vec<Arc<ZoneRuntime>>,
    pub state_store: StateStore,
    pub schedule_file: Option<PathBuf>,
    /// Last report timestamp per station id, for availability.
    pub station_seen: Mutex<BTreeMap<String, i64>>,
    /// Relay state as echoed by the stations themselves.
    pub relay_reported: Mutex<BTreeMap<String, bool>>,
    /// Active alerts keyed by id; a repeat replaces the previous one.
    pub notifications: Mutex<BTreeMap<String, Notification>>,
}

impl ServerContext {
    pub fn zone_by_name(&self, name: &str) -> Option<&Arc<ZoneRuntime>> {
        self.zones.iter().find(|rt| rt.name == name)
    }

    pub fn note_station(&self, id: &str) {
        self.station_seen
            .lock()
            .unwrap()
            .insert(id.to_string(), Local::now().timestamp());
    }

    /// Call with the zone lock released: persisting walks every zone.
    pub fn apply_effects(&self, rt: &ZoneRuntime, effects: TickEffects) {
        if let Some(on) = effects.heater {
            debug!(
                "[{}] relay {} -> {}",
                rt.name,
                rt.relay_addr,
                if on { "on" } else { "off" }
            );
            if let Err(err) = set_relay(&rt.relay_addr, on) {
                warn!(
                    "[{}] relay {} unreachable: {:#}",
                    rt.name, rt.relay_addr, err
                );
            }
        }
        if let Some(notification) = effects.notification {
            warn!(
                "[{}] {}: {}",
                rt.name, notification.title, notification.message
            );
            self.notifications
                .lock()
                .unwrap()
                .insert(notification.id.clone(), notification);
        }
        if effects.persist {
            self.persist();
        }
    }

    fn persist(&self) {
        let mut snapshots = BTreeMap::new();
        for rt in &self.zones {
            snapshots.insert(rt.name.clone(), rt.zone.lock().unwrap().snapshot());
        }
        if let Err(err) = self.state_store.save(&snapshots) {
            warn!("persisting state: {:#}", err);
        }
    }
}

/// Routes station reports into the zones they feed.
struct Ingest {
    ctx: Arc<ServerContext>,
}

impl Ingest {
    fn sensor_report(&self, report: &SensorReport) {
        let id = report.sensor_id();
        if report.fault_code() != 0 {
            warn!("sensor {} fault code {}", id, report.fault_code());
            return;
        }
        if !report.has_temperature_deci() {
            debug!("sensor {} report without a reading", id);
            return;
        }
        let temp = f64::from(report.temperature_deci()) * 0.1;
        self.ctx.note_station(id);

        // Reports only refresh the cache; the heartbeat drives control.
        // A sensor can be the indoor feed of one zone and the outdoor
        // feed of another, so every zone gets a look.
        for rt in &self.ctx.zones {
            if rt.indoor_sensor == id {
                rt.zone.lock().unwrap().set_indoor_temp(temp);
            }
            if rt.outdoor_sensor == id {
                rt.zone.lock().unwrap().set_outdoor_temp(temp);
            }
        }
    }

    fn switch_report(&self, report: &SwitchReport) {
        let id = report.switch_id();
        self.ctx.note_station(id);
        let now = Local::now();
        for rt in &self.ctx.zones {
            if rt.window_switch.as_deref() == Some(id) {
                rt.zone.lock().unwrap().request_pause(!report.closed(), now);
            }
        }
    }

    fn relay_report(&self, report: &RelayReport) {
        let id = report.relay_id();
        self.ctx.note_station(id);
        self.ctx
            .relay_reported
            .lock()
            .unwrap()
            .insert(id.to_string(), report.relay_on());
    }
}

impl ReportHandler for Ingest {
    fn on_report(&mut self, _src: SocketAddr, msg: TelemetryMessage) -> Result<()> {
        if let Some(sensor) = msg.sensor.as_ref() {
            self.sensor_report(sensor);
        }
        if let Some(switch) = msg.switch.as_ref() {
            self.switch_report(switch);
        }
        if let Some(relay) = msg.relay.as_ref() {
            self.relay_report(relay);
        }
        Ok(())
    }
}

/// Keeps zones cycling even when no sensor report arrives.
async fn heartbeat_loop(ctx: Arc<ServerContext>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        ticker.tick().await;
        for rt in &ctx.zones {
            let effects = rt.zone.lock().unwrap().control_tick(Local::now(), false);
            ctx.apply_effects(rt, effects);
        }
    }
}

async fn schedule_loop(ctx: Arc<ServerContext>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        ticker.tick().await;

        // One read per pass covers every externally scheduled zone. A
        // broken store keeps whatever schedules are already loaded.
        let external = match ctx.schedule_file.as_ref() {
            Some(path) => match load_schedules(path) {
                Ok(store) => Some(store),
                Err(err) => {
                    warn!("schedule store unreadable: {:#}", err);
                    None
                }
            },
            None => None,
        };

        let now = Local::now();
        for rt in &ctx.zones {
            let effects = {
                let mut zone = rt.zone.lock().unwrap();
                if rt.external_schedule {
                    if let Some(schedule) =
                        external.as_ref().and_then(|store| store.resolve(&rt.name))
                    {
                        zone.set_schedule(schedule);
                    }
                }
                zone.schedule_tick(now)
            };
            ctx.apply_effects(rt, effects);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config_path = PathBuf::from(
        env::args()
            .nth(1)
            .unwrap_or_else(|| "thermostat.json".to_string()),
    );
    let config = ServerConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let state_store = StateStore::new(config.state_file.clone());
    let restored = state_store.load();

    let now = Local::now();
    let mut zones = Vec::new();
    for entry in &config.zones {
        let snapshot = restored.get(&entry.name).cloned();
        if snapshot.is_some() {
            info!("[{}] restored previous state", entry.name);
        }
        zones.push(Arc::new(ZoneRuntime {
            name: entry.name.clone(),
            relay_addr: entry.relay_addr.clone(),
            indoor_sensor: entry.indoor_sensor.clone(),
            outdoor_sensor: entry.outdoor_sensor.clone(),
            window_switch: entry.window_switch.clone(),
            external_schedule: entry.external_schedule,
            zone: Mutex::new(Zone::new(&entry.name, entry.control.clone(), snapshot, now)),
        }));
    }

    let ctx = Arc::new(ServerContext {
        zones,
        state_store,
        schedule_file: config.schedule_file.clone(),
        station_seen: Mutex::new(BTreeMap::new()),
        relay_reported: Mutex::new(BTreeMap::new()),
        notifications: Mutex::new(BTreeMap::new()),
    });

    {
        let ctx = ctx.clone();
        let bind = config.http_bind.clone();
        let static_dir = config.static_dir.clone();
        tokio::spawn(async move {
            if let Err(err) = web::serve(ctx, bind, static_dir).await {
                error!("web interface failed: {:#}", err);
            }
        });
    }
    tokio::spawn(heartbeat_loop(ctx.clone()));
    tokio::spawn(schedule_loop(ctx.clone()));

    info!("telemetry listener on {}", config.telemetry_bind);
    let mut ingest = Ingest { ctx };
    TelemetryListener::new(&mut ingest).main_loop(&config.telemetry_bind)
}
