//! Instrument bus pollers.
//!
//! Two independent fixed-cadence loops, one per serial line, each walking a
//! small register map and merging normalized readings into the shared
//! [`LiveStore`]. A failed register read skips only that field for the
//! cycle — the previous value stays in the store and the cycle continues.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::{EnergyBusConfig, HeatMeterConfig};
use crate::decode::{i16_from_word, round2, scaled, u32_from_words};
use crate::driver::RegisterBus;
use crate::store::{LiveSnapshot, LiveStore};

async fn read_block<B: RegisterBus>(
    bus: &mut B,
    unit: u8,
    addr: u16,
    count: u16,
) -> Option<Vec<u16>> {
    match bus.read_registers(unit, addr, count).await {
        Ok(words) if words.len() == count as usize => Some(words),
        Ok(words) => {
            debug!(unit, addr, expected = count, got = words.len(), "short register read");
            None
        }
        Err(e) => {
            debug!(unit, addr, "register read failed: {e}");
            None
        }
    }
}

/// Two-register cumulative counter, high word first.
async fn read_pair<B: RegisterBus>(bus: &mut B, unit: u8, addr: u16) -> Option<u32> {
    read_block(bus, unit, addr, 2)
        .await
        .map(|w| u32_from_words(w[0], w[1]))
}

/// Poller for the dedicated heat-meter line.
pub struct HeatMeterPoller<B: RegisterBus> {
    bus: B,
    cfg: HeatMeterConfig,
    store: Arc<LiveStore>,
}

impl<B: RegisterBus> HeatMeterPoller<B> {
    pub fn new(bus: B, cfg: HeatMeterConfig, store: Arc<LiveStore>) -> Self {
        Self { bus, cfg, store }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(port = %self.cfg.serial.port, unit = self.cfg.unit, "heat-meter poller started");
        let mut ticker = interval(Duration::from_millis(self.cfg.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.poll_cycle().await,
            }
        }
        info!("heat-meter poller stopped");
    }

    /// One pass over the heat meter's register map.
    pub async fn poll_cycle(&mut self) {
        let unit = self.cfg.unit;

        if let Some(raw) = read_pair(&mut self.bus, unit, 0x0000).await {
            self.store.update(&LiveSnapshot {
                heat_pos_kwh: Some(scaled(raw, 100.0)),
                ..Default::default()
            });
        }
        if let Some(raw) = read_pair(&mut self.bus, unit, 0x0002).await {
            self.store.update(&LiveSnapshot {
                heat_neg_kwh: Some(scaled(raw, 100.0)),
                ..Default::default()
            });
        }
        if let Some(raw) = read_pair(&mut self.bus, unit, 0x0004).await {
            self.store.update(&LiveSnapshot {
                temp_in_c: Some(scaled(raw, 100.0)),
                ..Default::default()
            });
        }
        if let Some(raw) = read_pair(&mut self.bus, unit, 0x0006).await {
            self.store.update(&LiveSnapshot {
                temp_out_c: Some(scaled(raw, 100.0)),
                ..Default::default()
            });
        }
        if let Some(raw) = read_pair(&mut self.bus, unit, 0x0008).await {
            self.store.update(&LiveSnapshot {
                temp_diff_c: Some(scaled(raw, 100.0)),
                ..Default::default()
            });
        }
        if let Some(raw) = read_pair(&mut self.bus, unit, 0x000A).await {
            self.store.update(&LiveSnapshot {
                volume_m3: Some(scaled(raw, 100.0)),
                ..Default::default()
            });
        }
        if let Some(raw) = read_pair(&mut self.bus, unit, 0x000C).await {
            self.store.update(&LiveSnapshot {
                flow_m3h: Some(scaled(raw, 10_000.0)),
                ..Default::default()
            });
        }
        if let Some(raw) = read_pair(&mut self.bus, unit, 0x000E).await {
            self.store.update(&LiveSnapshot {
                heat_power_kw: Some(scaled(raw, 100.0)),
                ..Default::default()
            });
        }
        if let Some(words) = read_block(&mut self.bus, unit, 0x0010, 1).await {
            self.store.update(&LiveSnapshot {
                fault_code: Some(words[0] as i64),
                ..Default::default()
            });
        }
        if let Some(words) = read_block(&mut self.bus, unit, 0x0011, 1).await {
            self.store.update(&LiveSnapshot {
                work_hours: Some(words[0] as i64),
                ..Default::default()
            });
        }
    }
}

/// Poller for the combined electricity-meter / climate-sensor line.
pub struct BusPoller<B: RegisterBus> {
    bus: B,
    cfg: EnergyBusConfig,
    store: Arc<LiveStore>,
}

impl<B: RegisterBus> BusPoller<B> {
    pub fn new(bus: B, cfg: EnergyBusConfig, store: Arc<LiveStore>) -> Self {
        Self { bus, cfg, store }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(port = %self.cfg.serial.port, "energy bus poller started");
        let mut ticker = interval(Duration::from_millis(self.cfg.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.poll_cycle().await,
            }
        }
        info!("energy bus poller stopped");
    }

    /// One pass over the meter and the climate sensor sharing the line.
    pub async fn poll_cycle(&mut self) {
        // Grid active power (W).
        if let Some(raw) = read_pair(&mut self.bus, self.cfg.energy_unit, 0x0109).await {
            self.store.update(&LiveSnapshot {
                grid_power_w: Some(round2(raw as f64)),
                ..Default::default()
            });
        }
        Self::pause(self.cfg.inter_read_pause_ms).await;

        // Cumulative imported energy (kWh).
        if let Some(raw) = read_pair(&mut self.bus, self.cfg.energy_unit, 0x0120).await {
            self.store.update(&LiveSnapshot {
                grid_energy_kwh: Some(scaled(raw, 100.0)),
                ..Default::default()
            });
        }
        Self::pause(self.cfg.inter_read_pause_ms).await;

        // Humidity and signed ambient temperature in one block.
        if let Some(words) = read_block(&mut self.bus, self.cfg.climate_unit, 0x0000, 2).await {
            self.store.update(&LiveSnapshot {
                ambient_rh: Some(round2(words[0] as f64 / 10.0)),
                ambient_c: Some(round2(i16_from_word(words[1]) as f64 / 10.0)),
                ..Default::default()
            });
        }
    }

    async fn pause(pause_ms: u64) {
        if pause_ms > 0 {
            sleep(Duration::from_millis(pause_ms)).await;
        }
    }
}
