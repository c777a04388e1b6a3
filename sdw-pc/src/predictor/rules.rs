//! Rule-based predictor

use super::{Features, ModelInfo, Prediction, PumpPredictor, FEATURE_NAMES};

/// Scaled irradiance above which solar can drive the pump
const SOLAR_AVAILABLE: f64 = 0.15;
/// Rainfall (mm) above which the site counts as powered
const RAIN_AVAILABLE: f64 = 2.0;

const CONFIDENCE_ON: f64 = 0.85;
const CONFIDENCE_OFF: f64 = 0.90;

/// ON when the reading is in the pump-on zone and power is available
///
/// The pump-on zone is `[0, pump_on_threshold]`. Readings grow while the
/// pump runs, so a high reading means there is little left to move and the
/// rule answers OFF there.
#[derive(Debug, Clone, Copy)]
pub struct RuleBasedPredictor {
    pump_on_threshold: f64,
    container_height: f64,
}

impl RuleBasedPredictor {
    pub fn new(pump_on_threshold: f64, container_height: f64) -> Self {
        Self {
            pump_on_threshold,
            container_height,
        }
    }
}

impl PumpPredictor for RuleBasedPredictor {
    fn predict(&self, features: &Features) -> Prediction {
        let level = features.water_level;
        let in_zone = level >= 0.0 && level <= self.pump_on_threshold;
        let powered = features.solar_historical > SOLAR_AVAILABLE || features.rain > RAIN_AVAILABLE;

        if in_zone && powered {
            Prediction::on(CONFIDENCE_ON)
        } else {
            Prediction::off(CONFIDENCE_OFF)
        }
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            model_loaded: false,
            model_path: None,
            model_type: "RuleBased".to_string(),
            features: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            container_height: self.container_height,
            pump_threshold: self.pump_on_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(water_level: f64, rain: f64, solar_historical: f64) -> Features {
        Features {
            water_level,
            rain,
            solar_historical,
            time_of_day: 2,
            diesel_cost: 18.5,
        }
    }

    #[test]
    fn test_on_with_sun_in_zone() {
        let p = RuleBasedPredictor::new(3.5, 6.0).predict(&features(2.0, 0.0, 0.45));
        assert_eq!(p, Prediction::on(0.85));
    }

    #[test]
    fn test_on_with_rain_only() {
        let p = RuleBasedPredictor::new(3.5, 6.0).predict(&features(3.5, 2.5, 0.0));
        assert_eq!(p.label, 1);
    }

    #[test]
    fn test_off_without_power() {
        let p = RuleBasedPredictor::new(3.5, 6.0).predict(&features(1.0, 1.0, 0.1));
        assert_eq!(p, Prediction::off(0.90));
    }

    #[test]
    fn test_high_reading_is_off_even_with_sun() {
        // Low reading means pump; a reading near the top of the tank never does
        let p = RuleBasedPredictor::new(3.5, 6.0).predict(&features(5.0, 0.0, 0.45));
        assert_eq!(p, Prediction::off(0.90));

        let p = RuleBasedPredictor::new(3.5, 6.0).predict(&features(1.0, 0.0, 0.45));
        assert_eq!(p, Prediction::on(0.85));
    }

    #[test]
    fn test_off_above_zone() {
        let p = RuleBasedPredictor::new(3.5, 6.0).predict(&features(3.6, 5.0, 0.9));
        assert_eq!(p.label, 0);
    }
}
