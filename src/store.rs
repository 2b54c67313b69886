//! Shared last-known-value store.
//!
//! Both pollers merge partial readings into one snapshot under a single
//! mutex; the recorder reads a self-consistent point-in-time copy. Fields a
//! poller has not yet produced (or failed to refresh) stay `None` / stale —
//! absence is the only failure signal visible downstream.

use std::sync::Mutex;

/// One point-in-time view of everything the buses have reported so far.
///
/// Also used as the partial update type: a poller fills in just the fields
/// its read produced and merges them with [`LiveStore::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSnapshot {
    /// Grid-side active electrical power (W).
    pub grid_power_w: Option<f64>,
    /// Grid-side cumulative imported energy (kWh).
    pub grid_energy_kwh: Option<f64>,
    /// Heat-meter instantaneous thermal power (kW).
    pub heat_power_kw: Option<f64>,
    /// Cumulative heating energy (kWh).
    pub heat_pos_kwh: Option<f64>,
    /// Cumulative cooling energy (kWh).
    pub heat_neg_kwh: Option<f64>,
    /// Circuit inlet temperature (°C).
    pub temp_in_c: Option<f64>,
    /// Circuit outlet temperature (°C).
    pub temp_out_c: Option<f64>,
    /// Inlet/outlet temperature difference (K).
    pub temp_diff_c: Option<f64>,
    /// Live volumetric flow (m³/h).
    pub flow_m3h: Option<f64>,
    /// Cumulative volume (m³).
    pub volume_m3: Option<f64>,
    /// Heat-meter fault code.
    pub fault_code: Option<i64>,
    /// Heat-meter running hours counter.
    pub work_hours: Option<i64>,
    /// Ambient air temperature (°C).
    pub ambient_c: Option<f64>,
    /// Ambient relative humidity (%RH).
    pub ambient_rh: Option<f64>,
}

impl LiveSnapshot {
    /// Whether any field has ever been populated.
    pub fn has_data(&self) -> bool {
        *self != LiveSnapshot::default()
    }

    /// Merge `partial` into `self`: present fields overwrite, absent fields
    /// keep their previous value. Keys are never deleted.
    fn merge(&mut self, partial: &LiveSnapshot) {
        if partial.grid_power_w.is_some() {
            self.grid_power_w = partial.grid_power_w;
        }
        if partial.grid_energy_kwh.is_some() {
            self.grid_energy_kwh = partial.grid_energy_kwh;
        }
        if partial.heat_power_kw.is_some() {
            self.heat_power_kw = partial.heat_power_kw;
        }
        if partial.heat_pos_kwh.is_some() {
            self.heat_pos_kwh = partial.heat_pos_kwh;
        }
        if partial.heat_neg_kwh.is_some() {
            self.heat_neg_kwh = partial.heat_neg_kwh;
        }
        if partial.temp_in_c.is_some() {
            self.temp_in_c = partial.temp_in_c;
        }
        if partial.temp_out_c.is_some() {
            self.temp_out_c = partial.temp_out_c;
        }
        if partial.temp_diff_c.is_some() {
            self.temp_diff_c = partial.temp_diff_c;
        }
        if partial.flow_m3h.is_some() {
            self.flow_m3h = partial.flow_m3h;
        }
        if partial.volume_m3.is_some() {
            self.volume_m3 = partial.volume_m3;
        }
        if partial.fault_code.is_some() {
            self.fault_code = partial.fault_code;
        }
        if partial.work_hours.is_some() {
            self.work_hours = partial.work_hours;
        }
        if partial.ambient_c.is_some() {
            self.ambient_c = partial.ambient_c;
        }
        if partial.ambient_rh.is_some() {
            self.ambient_rh = partial.ambient_rh;
        }
    }
}

/// Thread-safe live value store shared by the pollers and the recorder.
///
/// `update` and `snapshot` share one mutex, so the recorder never observes a
/// torn multi-field write.
#[derive(Debug, Default)]
pub struct LiveStore {
    inner: Mutex<LiveSnapshot>,
}

impl LiveStore {
    /// Merge a partial reading and return the resulting full snapshot.
    pub fn update(&self, partial: &LiveSnapshot) -> LiveSnapshot {
        let mut guard = self.inner.lock().expect("live store mutex poisoned");
        guard.merge(partial);
        guard.clone()
    }

    /// Copy of the current full snapshot.
    pub fn snapshot(&self) -> LiveSnapshot {
        self.inner.lock().expect("live store mutex poisoned").clone()
    }
}
