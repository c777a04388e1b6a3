//! Control loop
//!
//! Background task that advances the simulation every interval. One tick:
//!
//! 1. fetch weather (outside the state lock; provider masks its own failures)
//! 2. under one write guard: step the level, score features, update
//!    telemetry, run the decision policy, stamp `last_updated`
//! 3. log transitions and broadcast events
//!
//! A tick that errors or panics is abandoned with nothing committed. It is
//! logged, counted, and the next tick runs on schedule.

use chrono::FixedOffset;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sdw_common::config::TomlConfig;
use sdw_common::events::SdwEvent;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::policy::{decide, ControlThresholds, PolicyInput, Rule};
use crate::predictor::{Features, Prediction, PumpPredictor};
use crate::simulation::{
    next_co2_saved, next_hybrid_usage, site_offset, solar_power, time_of_day_bucket_at,
    TankSimulator,
};
use crate::state::{PumpStatus, SharedState, WeatherSource};
use crate::weather::WeatherProvider;

/// Irradiance (W/m²) → `solar_historical` feature
const SOLAR_FEATURE_SCALE: f64 = 0.001;

/// What one committed tick did
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub previous_pump: PumpStatus,
    pub pump_status: PumpStatus,
    pub water_level: f64,
    pub prediction: Prediction,
    pub rule: Rule,
    pub override_expired: bool,
    pub weather_source: WeatherSource,
}

impl TickReport {
    pub fn pump_changed(&self) -> bool {
        self.previous_pump != self.pump_status
    }
}

pub struct ControlLoop {
    state: Arc<SharedState>,
    weather: Arc<dyn WeatherProvider>,
    predictor: Arc<dyn PumpPredictor>,
    thresholds: ControlThresholds,
    tank: TankSimulator,
    diesel_cost: f64,
    site_clock: FixedOffset,
    interval: Duration,
    rng: Mutex<StdRng>,
}

impl ControlLoop {
    pub fn new(
        state: Arc<SharedState>,
        weather: Arc<dyn WeatherProvider>,
        predictor: Arc<dyn PumpPredictor>,
        config: &TomlConfig,
    ) -> Self {
        let rng = match config.simulation.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            state,
            weather,
            predictor,
            thresholds: ControlThresholds::from_config(&config.control),
            tank: TankSimulator::new(config.control.container_height, &config.simulation),
            diesel_cost: config.predictor.diesel_cost,
            site_clock: site_offset(config.weather.utc_offset_minutes),
            interval: Duration::from_secs(config.control.update_interval_secs),
            rng: Mutex::new(rng),
        }
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Run one tick and commit it
    pub async fn tick(&self) -> Result<TickReport> {
        let sample = self.weather.current().await;
        let weather = sample.weather;
        if !weather.is_finite() {
            return Err(Error::InvalidState(format!(
                "weather sample is not finite: {:?}",
                weather
            )));
        }

        let now = self.state.now();
        let report = self
            .state
            .commit_tick(|s| {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

                let previous_pump = s.pump_status;
                let stepped = self.tank.step(s.water_level(), previous_pump, &mut *rng);
                let level = s.set_water_level(stepped)?;

                s.weather = weather;
                s.weather_source = sample.source;

                let features = Features {
                    water_level: level,
                    rain: weather.rainfall,
                    solar_historical: weather.solar_irradiance * SOLAR_FEATURE_SCALE,
                    time_of_day: time_of_day_bucket_at(now, self.site_clock),
                    diesel_cost: self.diesel_cost,
                };
                let prediction = self.predictor.predict(&features);
                if prediction.label > 1 || !prediction.confidence.is_finite() {
                    return Err(Error::InvalidState(format!(
                        "predictor returned {:?}",
                        prediction
                    )));
                }
                s.ai_prediction = prediction.label;
                s.ai_confidence = prediction.confidence;

                s.solar_power = solar_power(weather.solar_irradiance);
                s.hybrid_usage = next_hybrid_usage(s.hybrid_usage, weather.solar_irradiance, &mut *rng);
                s.co2_saved = next_co2_saved(s.co2_saved, &mut *rng);

                let decision = decide(
                    &PolicyInput {
                        pump_status: previous_pump,
                        water_level: level,
                        manual_override: s.manual_override,
                        manual_override_until: s.manual_override_until,
                        prediction: prediction.label,
                        confidence: prediction.confidence,
                        now,
                    },
                    &self.thresholds,
                );
                s.pump_status = decision.pump_status;
                s.manual_override = decision.manual_override;
                s.manual_override_until = decision.manual_override_until;

                s.last_updated = now;
                s.ticks_completed += 1;
                s.last_tick_failed = false;

                Ok(TickReport {
                    previous_pump,
                    pump_status: decision.pump_status,
                    water_level: level,
                    prediction,
                    rule: decision.rule,
                    override_expired: decision.override_expired,
                    weather_source: sample.source,
                })
            })
            .await?;

        self.announce(&report);
        Ok(report)
    }

    fn announce(&self, report: &TickReport) {
        let now = self.state.now();
        let level = report.water_level;

        if report.override_expired {
            info!("Manual override expired, AI control resumed");
            self.state.broadcast_event(SdwEvent::OverrideChanged {
                enabled: false,
                until: None,
                expired: true,
                timestamp: now,
            });
        }

        if report.pump_changed() {
            match report.rule {
                Rule::EmergencyFloor => {
                    warn!("EMERGENCY: water level {:.2} at or below floor, pump started", level)
                }
                Rule::SafetyCeiling => {
                    warn!("SAFETY: water level {:.2} at or above ceiling, pump stopped", level)
                }
                Rule::PredictorStart => info!(
                    "AI started pump at level {:.2} (confidence {:.3})",
                    level, report.prediction.confidence
                ),
                Rule::PredictorStop => info!(
                    "AI stopped pump at level {:.2} (confidence {:.3})",
                    level, report.prediction.confidence
                ),
                Rule::OverrideActive | Rule::Hold => {}
            }

            if let Some(source) = report.rule.change_source() {
                self.state.broadcast_event(SdwEvent::PumpStateChanged {
                    previous: report.previous_pump,
                    current: report.pump_status,
                    source,
                    water_level: level,
                    timestamp: now,
                });
            }
        }

        debug!(
            "Tick: level {:.2}, pump {}, prediction {} ({:.3}), weather {}",
            level,
            report.pump_status,
            report.prediction.label,
            report.prediction.confidence,
            report.weather_source
        );

        self.state.broadcast_event(SdwEvent::TickCompleted {
            water_level: level,
            pump_status: report.pump_status,
            ai_prediction: report.prediction.label,
            timestamp: now,
        });
    }

    /// Run one tick, absorbing errors and panics
    ///
    /// Returns true if the tick committed.
    pub async fn run_tick(&self) -> bool {
        match AssertUnwindSafe(self.tick()).catch_unwind().await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                error!("Control loop tick abandoned: {}", e);
                self.state.record_tick_failure().await;
                false
            }
            Err(panic) => {
                error!("Control loop tick panicked: {}", panic_message(panic.as_ref()));
                self.state.record_tick_failure().await;
                false
            }
        }
    }

    /// Tick forever on the configured interval
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Control loop started (interval {:?})", self.interval);
        loop {
            interval.tick().await;
            self.run_tick().await;
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
