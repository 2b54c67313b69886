//! Operating-status vocabulary and the mode classifier.
//!
//! The classifier is a pure function of the current snapshot and the
//! previous mode. Branch order is the tie-break policy: a clear positive
//! temperature delta means heating, a clear negative delta means cooling
//! unless the ambient air is cold enough to indicate a defrost cycle, and
//! anything inconclusive holds the previous mode.

use std::fmt;
use std::str::FromStr;

use crate::config::ClassifierConfig;
use crate::store::LiveSnapshot;

/// Status labels persisted with every sample.
///
/// `Standby`/`Heating`/`Cooling`/`Defrost` are operating modes and
/// accumulate time in the summaries. `On`/`Off` are process-lifecycle
/// boundary markers: they break segment runs and are counted as events, but
/// never accumulate duration or energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Standby,
    Heating,
    Cooling,
    Defrost,
    On,
    Off,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Standby => "S",
            Status::Heating => "H",
            Status::Cooling => "C",
            Status::Defrost => "D",
            Status::On => "ON",
            Status::Off => "OFF",
        }
    }

    /// Lifecycle marker rather than an operating mode.
    pub fn is_boundary(self) -> bool {
        matches!(self, Status::On | Status::Off)
    }

    /// Accumulates duration/energy in day segments.
    pub fn is_accumulating(self) -> bool {
        !self.is_boundary()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S" => Ok(Status::Standby),
            "H" => Ok(Status::Heating),
            "C" => Ok(Status::Cooling),
            "D" => Ok(Status::Defrost),
            "ON" => Ok(Status::On),
            "OFF" => Ok(Status::Off),
            other => Err(format!("unknown status label: {other}")),
        }
    }
}

/// Classify the current instant into an operating mode.
///
/// `prev` is the classifier's own previous output (an operating mode, never
/// a boundary marker); the hold-over branches are self-loops on it, falling
/// back to `Standby` when there is no history yet. Missing fields are
/// excluded from the decision, never treated as zero — except power and
/// flow, where "never observed" and "not running" are indistinguishable.
pub fn classify(snap: &LiveSnapshot, prev: Option<Status>, cfg: &ClassifierConfig) -> Status {
    let hold = prev.unwrap_or(Status::Standby);
    let power = snap.grid_power_w.unwrap_or(0.0);
    let flow = snap.flow_m3h.unwrap_or(0.0);

    // Compressor running: decide by circuit temperature differential.
    if power > cfg.power_high_w && flow > 0.0 {
        return match (snap.temp_in_c, snap.temp_out_c) {
            (Some(t_in), Some(t_out)) if t_in - t_out > cfg.delta_t_c => Status::Heating,
            (Some(t_in), Some(t_out)) if t_out - t_in > cfg.delta_t_c => match snap.ambient_c {
                Some(ambient) if ambient < cfg.ambient_max_c => Status::Defrost,
                _ => Status::Cooling,
            },
            // Delta inside the dead band, or a temperature missing: hold.
            _ => hold,
        };
    }

    // Coasting: pumps still moving water at reduced power, not a transition.
    if power > cfg.power_low_w && flow > cfg.flow_min_m3h {
        return hold;
    }

    Status::Standby
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(
        power: f64,
        flow: f64,
        t_in: Option<f64>,
        t_out: Option<f64>,
        ambient: Option<f64>,
    ) -> LiveSnapshot {
        LiveSnapshot {
            grid_power_w: Some(power),
            flow_m3h: Some(flow),
            temp_in_c: t_in,
            temp_out_c: t_out,
            ambient_c: ambient,
            ..Default::default()
        }
    }

    fn cfg() -> ClassifierConfig {
        ClassifierConfig::default()
    }

    #[test]
    fn hot_inlet_means_heating() {
        let s = snap(400.0, 0.5, Some(45.0), Some(35.0), Some(15.0));
        assert_eq!(classify(&s, Some(Status::Standby), &cfg()), Status::Heating);
    }

    #[test]
    fn cold_inlet_with_cold_ambient_means_defrost() {
        let s = snap(400.0, 0.5, Some(35.0), Some(45.0), Some(5.0));
        assert_eq!(classify(&s, Some(Status::Standby), &cfg()), Status::Defrost);
    }

    #[test]
    fn cold_inlet_with_warm_ambient_means_cooling() {
        let s = snap(400.0, 0.5, Some(35.0), Some(45.0), Some(25.0));
        assert_eq!(classify(&s, Some(Status::Standby), &cfg()), Status::Cooling);
    }

    #[test]
    fn cold_inlet_without_ambient_means_cooling() {
        let s = snap(400.0, 0.5, Some(35.0), Some(45.0), None);
        assert_eq!(classify(&s, Some(Status::Standby), &cfg()), Status::Cooling);
    }

    #[test]
    fn low_power_no_flow_is_standby_regardless_of_history() {
        let s = snap(50.0, 0.0, Some(45.0), Some(35.0), Some(15.0));
        assert_eq!(classify(&s, Some(Status::Heating), &cfg()), Status::Standby);
        assert_eq!(classify(&s, None, &cfg()), Status::Standby);
    }

    #[test]
    fn delta_inside_dead_band_holds_previous_mode() {
        let s = snap(400.0, 0.5, Some(40.0), Some(40.01), Some(15.0));
        assert_eq!(classify(&s, Some(Status::Heating), &cfg()), Status::Heating);
        assert_eq!(classify(&s, None, &cfg()), Status::Standby);
    }

    #[test]
    fn missing_temperature_holds_previous_mode() {
        let s = snap(400.0, 0.5, None, Some(35.0), Some(15.0));
        assert_eq!(classify(&s, Some(Status::Cooling), &cfg()), Status::Cooling);
        assert_eq!(classify(&s, None, &cfg()), Status::Standby);
    }

    #[test]
    fn coasting_power_holds_previous_mode() {
        // Above the low threshold with real flow, below the high threshold.
        let s = snap(150.0, 0.5, Some(45.0), Some(35.0), Some(15.0));
        assert_eq!(classify(&s, Some(Status::Heating), &cfg()), Status::Heating);
        assert_eq!(classify(&s, Some(Status::Defrost), &cfg()), Status::Defrost);
        assert_eq!(classify(&s, None, &cfg()), Status::Standby);
    }

    #[test]
    fn coasting_needs_flow_above_threshold() {
        let s = snap(150.0, 0.1, Some(45.0), Some(35.0), Some(15.0));
        assert_eq!(classify(&s, Some(Status::Heating), &cfg()), Status::Standby);
    }

    #[test]
    fn status_labels_round_trip() {
        for status in [
            Status::Standby,
            Status::Heating,
            Status::Cooling,
            Status::Defrost,
            Status::On,
            Status::Off,
        ] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("X".parse::<Status>().is_err());
    }
}
