// src/device/sim.rs - Simulated plotter backend
//
// Stands in for the hardware so the host runs end-to-end without a device
// attached. Plot durations derive from the document's embedded travel
// distance, scaled by the configured time factor (0 = instant).
use std::time::Duration;

use crate::config::DeviceConfig;
use crate::doc::{DocMeta, PlotDoc};
use crate::job::PlotStats;

use super::{PlotOutcome, PlotRequest, PlotterDriver, ReturnCode};

#[derive(Debug, Clone)]
pub struct SimDriver {
    pen_speed_mm_s: f64,
    time_scale: f64,
}

impl SimDriver {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            pen_speed_mm_s: config.pen_speed_mm_s,
            time_scale: config.sim_time_scale,
        }
    }

    fn estimate(&self, travel_mm: f64, speed_fraction: f64) -> f64 {
        let speed = (self.pen_speed_mm_s * speed_fraction).max(1.0);
        travel_mm / speed
    }
}

impl PlotterDriver for SimDriver {
    fn align(&self) -> ReturnCode {
        tracing::debug!("sim: align, motors released");
        ReturnCode::NOMINAL
    }

    fn cycle(&self) -> ReturnCode {
        tracing::debug!("sim: pen cycle");
        ReturnCode::NOMINAL
    }

    fn plot(&self, request: &PlotRequest) -> PlotOutcome {
        let meta = DocMeta::extract(&request.payload).unwrap_or_default();
        let seconds = self.estimate(meta.travel, request.speed_fraction);
        tracing::debug!(
            travel_mm = meta.travel,
            seconds,
            resume = ?request.resume,
            "sim: plotting"
        );
        if self.time_scale > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(seconds * self.time_scale));
        }
        PlotOutcome {
            code: ReturnCode::NOMINAL,
            output: None,
        }
    }

    fn simulate(&self, doc: &PlotDoc) -> PlotStats {
        let meta = doc.meta();
        let speed_fraction = f64::from(meta.speed.unwrap_or(100)) / 100.0;
        PlotStats {
            time_estimate: self.estimate(meta.travel, speed_fraction),
            distance_total: meta.travel,
            distance_pen_down: meta.travel_ink,
            pen_lifts: meta.line_count,
            layers: meta.layer_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    #[test]
    fn simulate_reads_stats_from_metadata() {
        let driver = SimDriver::new(&DeviceConfig::default());
        let doc = PlotDoc::parse(
            "<svg tg:count=\"8\" tg:layer_count=\"3\" tg:travel=\"1000\" tg:travel_ink=\"800\" tg:speed=\"50\"></svg>"
                .to_string(),
        )
        .unwrap();
        let stats = driver.simulate(&doc);
        assert_eq!(stats.distance_total, 1000.0);
        assert_eq!(stats.distance_pen_down, 800.0);
        assert_eq!(stats.pen_lifts, 8);
        assert_eq!(stats.layers, 3);
        assert!(stats.time_estimate > 0.0);
    }
}
