//! Tank and telemetry simulation
//!
//! Stands in for the level sensor and power meter. The reading rises while
//! the pump runs and falls while it is off; each step is drawn from a bounded
//! uniform range. The random source is passed in so tests can seed it.

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use rand::Rng;
use sdw_common::config::SimulationConfig;

use crate::state::PumpStatus;

/// Irradiance (W/m²) → solar output (kW)
const SOLAR_KW_PER_WM2: f64 = 0.012;
/// Below this irradiance the diesel share grows
const LOW_SOLAR_IRRADIANCE: f64 = 200.0;
const HYBRID_USAGE_CAP: f64 = 80.0;

/// Per-tick water level model
#[derive(Debug, Clone)]
pub struct TankSimulator {
    container_height: f64,
    rise: (f64, f64),
    fall: (f64, f64),
}

impl TankSimulator {
    pub fn new(container_height: f64, config: &SimulationConfig) -> Self {
        Self {
            container_height,
            rise: (config.rise_min, config.rise_max),
            fall: (config.fall_min, config.fall_max),
        }
    }

    /// Next reading after one tick, clamped to `[0, container_height]`
    pub fn step<R: Rng + ?Sized>(&self, level: f64, pump: PumpStatus, rng: &mut R) -> f64 {
        let next = match pump {
            PumpStatus::Running => level + rng.gen_range(self.rise.0..=self.rise.1),
            PumpStatus::Off => level - rng.gen_range(self.fall.0..=self.fall.1),
        };
        next.clamp(0.0, self.container_height)
    }
}

/// Solar output estimate from irradiance
pub fn solar_power(irradiance: f64) -> f64 {
    (irradiance * SOLAR_KW_PER_WM2).max(0.0)
}

/// Diesel share drifts up in poor sun, down otherwise; stays in [0, 80]
pub fn next_hybrid_usage<R: Rng + ?Sized>(current: f64, irradiance: f64, rng: &mut R) -> f64 {
    if irradiance < LOW_SOLAR_IRRADIANCE {
        (current + rng.gen_range(1.0..=5.0)).min(HYBRID_USAGE_CAP)
    } else {
        (current - rng.gen_range(0.5..=2.0)).max(0.0)
    }
}

/// CO2 savings only ever grow
pub fn next_co2_saved<R: Rng + ?Sized>(current: f64, rng: &mut R) -> f64 {
    current + rng.gen_range(0.05..=0.3)
}

/// Quarter-of-day bucket: 0 night, 1 morning, 2 afternoon, 3 evening
pub fn time_of_day_bucket(hour: u32) -> u8 {
    ((hour / 6) % 4) as u8
}

/// Site wall clock from a UTC offset in minutes; out-of-range offsets read as UTC
pub fn site_offset(utc_offset_minutes: i32) -> FixedOffset {
    utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}

/// Bucket for an instant on the site's wall clock
pub fn time_of_day_bucket_at(now: DateTime<Utc>, site: FixedOffset) -> u8 {
    time_of_day_bucket(now.with_timezone(&site).hour())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tank() -> TankSimulator {
        TankSimulator::new(6.0, &SimulationConfig::default())
    }

    #[test]
    fn test_running_pump_raises_reading() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let next = tank().step(3.0, PumpStatus::Running, &mut rng);
            assert!(next >= 3.15 - 1e-9 && next <= 3.4 + 1e-9, "got {}", next);
        }
    }

    #[test]
    fn test_idle_pump_lowers_reading() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let next = tank().step(3.0, PumpStatus::Off, &mut rng);
            assert!(next >= 2.8 - 1e-9 && next <= 2.92 + 1e-9, "got {}", next);
        }
    }

    #[test]
    fn test_step_clamps_to_container() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(tank().step(5.95, PumpStatus::Running, &mut rng), 6.0);
        assert_eq!(tank().step(0.01, PumpStatus::Off, &mut rng), 0.0);
    }

    #[test]
    fn test_degenerate_range_is_deterministic() {
        let config = SimulationConfig {
            rise_min: 0.25,
            rise_max: 0.25,
            ..SimulationConfig::default()
        };
        let tank = TankSimulator::new(6.0, &config);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(tank.step(1.0, PumpStatus::Running, &mut rng), 1.25);
    }

    #[test]
    fn test_hybrid_usage_bounds() {
        let mut rng = StdRng::seed_from_u64(11);

        let mut usage = 78.0;
        for _ in 0..10 {
            usage = next_hybrid_usage(usage, 50.0, &mut rng);
            assert!(usage <= 80.0);
        }
        assert_eq!(usage, 80.0);

        let mut usage = 1.0;
        for _ in 0..10 {
            usage = next_hybrid_usage(usage, 600.0, &mut rng);
            assert!(usage >= 0.0);
        }
        assert_eq!(usage, 0.0);
    }

    #[test]
    fn test_co2_is_monotonic() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut co2 = 120.0;
        for _ in 0..50 {
            let next = next_co2_saved(co2, &mut rng);
            assert!(next > co2);
            co2 = next;
        }
    }

    #[test]
    fn test_solar_power_scaling() {
        assert!((solar_power(450.0) - 5.4).abs() < 1e-9);
        assert_eq!(solar_power(-10.0), 0.0);
    }

    #[test]
    fn test_time_of_day_buckets() {
        assert_eq!(time_of_day_bucket(0), 0);
        assert_eq!(time_of_day_bucket(5), 0);
        assert_eq!(time_of_day_bucket(6), 1);
        assert_eq!(time_of_day_bucket(13), 2);
        assert_eq!(time_of_day_bucket(23), 3);
    }

    #[test]
    fn test_bucket_follows_site_clock_not_host() {
        use chrono::TimeZone;

        // 20:00 UTC is 01:30 next day in India, 15:00 in New York (EST)
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 20, 0, 0).unwrap();
        assert_eq!(time_of_day_bucket_at(now, site_offset(330)), 0);
        assert_eq!(time_of_day_bucket_at(now, site_offset(-300)), 2);
        assert_eq!(time_of_day_bucket_at(now, site_offset(0)), 3);
        assert_eq!(site_offset(i32::MAX), Utc.fix());
    }
}
