//! Shared controller state
//!
//! Exactly one [`SystemState`] exists per process. It is owned by
//! [`SharedState`], which exposes the command surface operations plus
//! [`SharedState::commit_tick`] for the control loop. Nothing else can reach
//! the record.
//!
//! Every read and write goes through a single `RwLock`. A tick is applied to a
//! draft copy and swapped in under one write guard, so a concurrent status
//! read sees either the whole tick or none of it.

use chrono::{DateTime, Duration, Utc};
use sdw_common::config::ControlConfig;
use sdw_common::events::{ChangeSource, SdwEvent};
use sdw_common::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use crate::error::{Error, Result};

// Re-export PumpStatus from sdw-common so callers need only this module
pub use sdw_common::events::PumpStatus;

/// Last weather sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    /// Air temperature (°C)
    pub temperature: f64,
    /// Relative humidity (%)
    pub humidity: f64,
    /// Shortwave radiation (W/m²)
    pub solar_irradiance: f64,
    /// Precipitation (mm)
    pub rainfall: f64,
}

impl Default for Weather {
    fn default() -> Self {
        Self {
            temperature: 28.5,
            humidity: 65.0,
            solar_irradiance: 450.0,
            rainfall: 0.0,
        }
    }
}

impl Weather {
    pub fn is_finite(&self) -> bool {
        self.temperature.is_finite()
            && self.humidity.is_finite()
            && self.solar_irradiance.is_finite()
            && self.rainfall.is_finite()
    }
}

/// Which branch of the weather provider produced the sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherSource {
    Live,
    Synthetic,
}

impl fmt::Display for WeatherSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeatherSource::Live => f.write_str("live"),
            WeatherSource::Synthetic => f.write_str("synthetic"),
        }
    }
}

/// `clamp(level / container_height × 100, 0, 100)`
pub fn water_percentage(level: f64, container_height: f64) -> f64 {
    (level / container_height * 100.0).clamp(0.0, 100.0)
}

/// The controller's single state record
///
/// `water_level` and `water_percentage` are private: the only way to change
/// the level is [`SystemState::set_water_level`], which clamps it and
/// recomputes the percentage.
#[derive(Debug, Clone)]
pub struct SystemState {
    pub pump_status: PumpStatus,
    water_level: f64,
    water_percentage: f64,
    container_height: f64,
    /// Estimated solar output (kW)
    pub solar_power: f64,
    /// Share of demand met by diesel (%)
    pub hybrid_usage: f64,
    /// Cumulative CO2 avoided (kg)
    pub co2_saved: f64,
    pub ai_prediction: u8,
    pub ai_confidence: f64,
    pub manual_override: bool,
    pub manual_override_until: Option<DateTime<Utc>>,
    pub weather: Weather,
    pub weather_source: WeatherSource,
    pub last_updated: DateTime<Utc>,
    pub ticks_completed: u64,
    pub ticks_failed: u64,
    pub last_tick_failed: bool,
}

impl SystemState {
    /// Startup defaults
    pub fn new(container_height: f64, initial_water_level: f64, now: DateTime<Utc>) -> Self {
        let level = initial_water_level.clamp(0.0, container_height);
        Self {
            pump_status: PumpStatus::Off,
            water_level: level,
            water_percentage: water_percentage(level, container_height),
            container_height,
            solar_power: 0.0,
            hybrid_usage: 0.0,
            co2_saved: 120.0,
            ai_prediction: 0,
            ai_confidence: 0.0,
            manual_override: false,
            manual_override_until: None,
            weather: Weather::default(),
            weather_source: WeatherSource::Synthetic,
            last_updated: now,
            ticks_completed: 0,
            ticks_failed: 0,
            last_tick_failed: false,
        }
    }

    pub fn water_level(&self) -> f64 {
        self.water_level
    }

    pub fn water_percentage(&self) -> f64 {
        self.water_percentage
    }

    pub fn container_height(&self) -> f64 {
        self.container_height
    }

    /// Clamp `level` into `[0, container_height]`, store it and recompute the
    /// percentage. Returns the stored value.
    pub fn set_water_level(&mut self, level: f64) -> Result<f64> {
        if !level.is_finite() {
            return Err(Error::InvalidState(format!(
                "water level must be finite, got {}",
                level
            )));
        }
        self.water_level = level.clamp(0.0, self.container_height);
        self.water_percentage = water_percentage(self.water_level, self.container_height);
        Ok(self.water_level)
    }
}

/// Named test scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Low,
    Critical,
    Optimal,
    Full,
    Normal,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Low,
        Scenario::Critical,
        Scenario::Optimal,
        Scenario::Full,
        Scenario::Normal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::Low => "low",
            Scenario::Critical => "critical",
            Scenario::Optimal => "optimal",
            Scenario::Full => "full",
            Scenario::Normal => "normal",
        }
    }

    /// Fixed (water_level, pump_status) bundle
    pub fn preset(self) -> (f64, PumpStatus) {
        match self {
            Scenario::Low => (1.0, PumpStatus::Off),
            Scenario::Critical => (0.5, PumpStatus::Running),
            Scenario::Optimal => (4.0, PumpStatus::Off),
            Scenario::Full => (5.5, PumpStatus::Off),
            Scenario::Normal => (3.5, PumpStatus::Off),
        }
    }
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| Error::UnknownScenario(s.to_string()))
    }
}

/// Fixed parameters of the state store
#[derive(Debug, Clone)]
pub struct StateSettings {
    pub container_height: f64,
    pub initial_water_level: f64,
    /// Length of the override armed by start/stop commands
    pub override_duration: Duration,
}

impl StateSettings {
    pub fn from_config(control: &ControlConfig) -> Result<Self> {
        let override_duration = Duration::try_minutes(control.manual_override_minutes)
            .ok_or_else(|| {
                Error::Config(format!(
                    "manual_override_minutes = {} does not fit a duration",
                    control.manual_override_minutes
                ))
            })?;
        Ok(Self {
            container_height: control.container_height,
            initial_water_level: control.initial_water_level,
            override_duration,
        })
    }
}

impl Default for StateSettings {
    fn default() -> Self {
        let control = ControlConfig::default();
        Self {
            container_height: control.container_height,
            initial_water_level: control.initial_water_level,
            override_duration: Duration::minutes(control.manual_override_minutes),
        }
    }
}

/// Result of a start/stop command
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualCommand {
    pub pump_status: PumpStatus,
    /// When automatic control resumes
    pub until: DateTime<Utc>,
}

/// Owner of the process-wide [`SystemState`]
pub struct SharedState {
    state: RwLock<SystemState>,
    settings: StateSettings,
    clock: Arc<dyn Clock>,
    /// Event broadcaster for SSE events
    event_tx: broadcast::Sender<SdwEvent>,
}

impl SharedState {
    pub fn new(settings: StateSettings, clock: Arc<dyn Clock>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let initial = SystemState::new(
            settings.container_height,
            settings.initial_water_level,
            clock.now(),
        );
        Self {
            state: RwLock::new(initial),
            settings,
            clock,
            event_tx,
        }
    }

    pub fn settings(&self) -> &StateSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Broadcast an event to all SSE listeners
    pub fn broadcast_event(&self, event: SdwEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    /// Subscribe to event stream for SSE
    pub fn subscribe_events(&self) -> broadcast::Receiver<SdwEvent> {
        self.event_tx.subscribe()
    }

    /// Point-in-time copy of the whole record
    pub async fn snapshot(&self) -> SystemState {
        self.state.read().await.clone()
    }

    /// Manual start: pump on, timed override armed
    pub async fn start_pump(&self) -> Result<ManualCommand> {
        self.manual_command(PumpStatus::Running).await
    }

    /// Manual stop: pump off, timed override armed
    pub async fn stop_pump(&self) -> Result<ManualCommand> {
        self.manual_command(PumpStatus::Off).await
    }

    async fn manual_command(&self, target: PumpStatus) -> Result<ManualCommand> {
        let now = self.clock.now();
        let until = now
            .checked_add_signed(self.settings.override_duration)
            .ok_or_else(|| {
                Error::InvalidState(format!(
                    "override of {} minutes from {} is out of range",
                    self.settings.override_duration.num_minutes(),
                    now.to_rfc3339()
                ))
            })?;

        let (previous, level) = {
            let mut state = self.state.write().await;
            let previous = state.pump_status;
            state.pump_status = target;
            state.manual_override = true;
            state.manual_override_until = Some(until);
            (previous, state.water_level())
        };

        info!(
            "Pump {} manually, automatic control resumes at {}",
            if target.is_running() { "started" } else { "stopped" },
            until.to_rfc3339()
        );

        if previous != target {
            self.broadcast_event(SdwEvent::PumpStateChanged {
                previous,
                current: target,
                source: ChangeSource::Manual,
                water_level: level,
                timestamp: now,
            });
        }
        self.broadcast_event(SdwEvent::OverrideChanged {
            enabled: true,
            until: Some(until),
            expired: false,
            timestamp: now,
        });

        Ok(ManualCommand {
            pump_status: target,
            until,
        })
    }

    /// Set the override flag explicitly
    ///
    /// Disabling also drops the expiry; automatic rules run again from the
    /// next tick. Enabling keeps any existing expiry.
    pub async fn set_manual_override(&self, enabled: bool) -> bool {
        let until = {
            let mut state = self.state.write().await;
            state.manual_override = enabled;
            if !enabled {
                state.manual_override_until = None;
            }
            state.manual_override_until
        };

        if enabled {
            info!("Manual override enabled");
        } else {
            info!("Manual override disabled, AI control resumes next tick");
        }

        self.broadcast_event(SdwEvent::OverrideChanged {
            enabled,
            until,
            expired: false,
            timestamp: self.clock.now(),
        });
        enabled
    }

    /// Return pump, level and override fields to their startup defaults
    ///
    /// Weather and telemetry are left as they are.
    pub async fn reset(&self) {
        let (previous, level) = {
            let mut state = self.state.write().await;
            let previous = state.pump_status;
            state.pump_status = PumpStatus::Off;
            state.manual_override = false;
            state.manual_override_until = None;
            let initial = self
                .settings
                .initial_water_level
                .clamp(0.0, self.settings.container_height);
            state.water_level = initial;
            state.water_percentage = water_percentage(initial, self.settings.container_height);
            (previous, initial)
        };

        info!("System reset to default state");
        let now = self.clock.now();
        if previous != PumpStatus::Off {
            self.broadcast_event(SdwEvent::PumpStateChanged {
                previous,
                current: PumpStatus::Off,
                source: ChangeSource::Reset,
                water_level: level,
                timestamp: now,
            });
        }
        self.broadcast_event(SdwEvent::SystemReset { timestamp: now });
    }

    /// Debug injection of the water level; returns (level, percentage) as stored
    pub async fn set_water_level(&self, level: f64) -> Result<(f64, f64)> {
        if !level.is_finite() {
            return Err(Error::BadRequest(format!(
                "level must be a finite number, got {}",
                level
            )));
        }

        let mut state = self.state.write().await;
        let stored = state.set_water_level(level)?;
        info!("Test: water level set to {:.2}", stored);
        Ok((stored, state.water_percentage()))
    }

    /// Apply a named preset; returns the (level, pump) now in effect
    pub async fn apply_scenario(&self, scenario: Scenario) -> Result<(f64, PumpStatus)> {
        let (level, pump_status) = scenario.preset();
        let (previous, stored) = {
            let mut state = self.state.write().await;
            let previous = state.pump_status;
            let stored = state.set_water_level(level)?;
            state.pump_status = pump_status;
            (previous, stored)
        };

        info!("Simulating scenario: {}", scenario.name());
        let now = self.clock.now();
        if previous != pump_status {
            self.broadcast_event(SdwEvent::PumpStateChanged {
                previous,
                current: pump_status,
                source: ChangeSource::Scenario,
                water_level: stored,
                timestamp: now,
            });
        }
        self.broadcast_event(SdwEvent::ScenarioApplied {
            scenario: scenario.name().to_string(),
            water_level: stored,
            pump_status,
            timestamp: now,
        });
        Ok((stored, pump_status))
    }

    /// Apply one control loop tick atomically
    ///
    /// `apply` mutates a draft copy. The draft replaces the live record only
    /// if `apply` returns `Ok`; on error nothing is written.
    pub async fn commit_tick<R, F>(&self, apply: F) -> Result<R>
    where
        F: FnOnce(&mut SystemState) -> Result<R>,
    {
        let mut guard = self.state.write().await;
        let mut draft = guard.clone();
        let outcome = apply(&mut draft)?;
        *guard = draft;
        Ok(outcome)
    }

    /// Count an abandoned tick
    pub async fn record_tick_failure(&self) {
        let mut state = self.state.write().await;
        state.ticks_failed += 1;
        state.last_tick_failed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sdw_common::ManualClock;

    fn shared() -> (SharedState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
        ));
        (SharedState::new(StateSettings::default(), clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (state, _) = shared();
        let snap = state.snapshot().await;

        assert_eq!(snap.pump_status, PumpStatus::Off);
        assert_eq!(snap.water_level(), 1.5);
        assert_eq!(snap.water_percentage(), 25.0);
        assert_eq!(snap.co2_saved, 120.0);
        assert!(!snap.manual_override);
        assert!(snap.manual_override_until.is_none());
    }

    #[tokio::test]
    async fn test_start_pump_arms_timed_override() {
        let (state, clock) = shared();
        let cmd = state.start_pump().await.unwrap();

        assert_eq!(cmd.until, clock.now() + Duration::minutes(5));
        let snap = state.snapshot().await;
        assert_eq!(snap.pump_status, PumpStatus::Running);
        assert!(snap.manual_override);
        assert_eq!(snap.manual_override_until, Some(cmd.until));
    }

    #[test]
    fn test_unrepresentable_override_length_is_config_error() {
        let control = ControlConfig {
            manual_override_minutes: i64::MAX,
            ..ControlConfig::default()
        };
        assert!(matches!(
            StateSettings::from_config(&control),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_overflowing_override_is_error_not_panic() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
        ));
        let control = ControlConfig {
            manual_override_minutes: 1_000_000_000_000,
            ..ControlConfig::default()
        };
        let state = SharedState::new(StateSettings::from_config(&control).unwrap(), clock);

        assert!(matches!(
            state.start_pump().await,
            Err(Error::InvalidState(_))
        ));
        assert!(state.stop_pump().await.is_err());

        // Nothing was armed and the lock is still usable
        let snap = state.snapshot().await;
        assert_eq!(snap.pump_status, PumpStatus::Off);
        assert!(!snap.manual_override);
        assert!(snap.manual_override_until.is_none());
    }

    #[tokio::test]
    async fn test_stop_pump_arms_timed_override() {
        let (state, _) = shared();
        state.start_pump().await.unwrap();
        let cmd = state.stop_pump().await.unwrap();

        let snap = state.snapshot().await;
        assert_eq!(snap.pump_status, PumpStatus::Off);
        assert_eq!(snap.manual_override_until, Some(cmd.until));
    }

    #[tokio::test]
    async fn test_disable_override_clears_expiry() {
        let (state, _) = shared();
        state.start_pump().await.unwrap();

        state.set_manual_override(false).await;
        let snap = state.snapshot().await;
        assert!(!snap.manual_override);
        assert!(snap.manual_override_until.is_none());
        // Pump is left where the command put it until the next tick decides
        assert_eq!(snap.pump_status, PumpStatus::Running);
    }

    #[tokio::test]
    async fn test_enable_override_without_expiry() {
        let (state, _) = shared();
        state.set_manual_override(true).await;

        let snap = state.snapshot().await;
        assert!(snap.manual_override);
        assert!(snap.manual_override_until.is_none());
    }

    #[tokio::test]
    async fn test_reset_restores_defaults_but_keeps_telemetry() {
        let (state, _) = shared();
        state.start_pump().await.unwrap();
        state.set_water_level(4.2).await.unwrap();
        state
            .commit_tick(|s| {
                s.co2_saved = 140.0;
                s.hybrid_usage = 12.0;
                Ok(())
            })
            .await
            .unwrap();

        state.reset().await;
        let snap = state.snapshot().await;
        assert_eq!(snap.pump_status, PumpStatus::Off);
        assert_eq!(snap.water_level(), 1.5);
        assert_eq!(snap.water_percentage(), 25.0);
        assert!(!snap.manual_override);
        assert!(snap.manual_override_until.is_none());
        assert_eq!(snap.co2_saved, 140.0);
        assert_eq!(snap.hybrid_usage, 12.0);
    }

    #[tokio::test]
    async fn test_set_water_level_clamps() {
        let (state, _) = shared();

        assert_eq!(state.set_water_level(9.0).await.unwrap(), (6.0, 100.0));
        assert_eq!(state.set_water_level(-2.0).await.unwrap(), (0.0, 0.0));
        assert_eq!(state.set_water_level(3.0).await.unwrap(), (3.0, 50.0));
        assert!(matches!(
            state.set_water_level(f64::NAN).await,
            Err(Error::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_critical_scenario_is_exact() {
        let (state, _) = shared();
        let applied = state
            .apply_scenario("critical".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(applied, (0.5, PumpStatus::Running));

        let snap = state.snapshot().await;
        assert_eq!(snap.water_level(), 0.5);
        assert_eq!(snap.pump_status, PumpStatus::Running);
        assert!((snap.water_percentage() - 0.5 / 6.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_scenario_rejected() {
        assert!(matches!(
            "flood".parse::<Scenario>(),
            Err(Error::UnknownScenario(name)) if name == "flood"
        ));
        for scenario in Scenario::ALL {
            assert_eq!(scenario.name().parse::<Scenario>().unwrap(), scenario);
        }
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_state_untouched() {
        let (state, _) = shared();
        let before = state.snapshot().await;

        let result: Result<()> = state
            .commit_tick(|s| {
                s.pump_status = PumpStatus::Running;
                s.set_water_level(5.0)?;
                Err(Error::InvalidState("abandon".to_string()))
            })
            .await;

        assert!(result.is_err());
        let after = state.snapshot().await;
        assert_eq!(after.pump_status, before.pump_status);
        assert_eq!(after.water_level(), before.water_level());
    }

    #[tokio::test]
    async fn test_scenario_and_reset_report_pump_changes() {
        let (state, _) = shared();
        let mut rx = state.subscribe_events();

        state.apply_scenario(Scenario::Critical).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            SdwEvent::PumpStateChanged {
                source: ChangeSource::Scenario,
                current: PumpStatus::Running,
                ..
            }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SdwEvent::ScenarioApplied { .. }
        ));

        state.reset().await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            SdwEvent::PumpStateChanged {
                source: ChangeSource::Reset,
                current: PumpStatus::Off,
                ..
            }
        ));
        assert!(matches!(rx.recv().await.unwrap(), SdwEvent::SystemReset { .. }));
    }

    #[tokio::test]
    async fn test_commands_broadcast_events() {
        let (state, _) = shared();
        let mut rx = state.subscribe_events();

        state.start_pump().await.unwrap();

        match rx.recv().await.unwrap() {
            SdwEvent::PumpStateChanged { current, source, .. } => {
                assert_eq!(current, PumpStatus::Running);
                assert_eq!(source, ChangeSource::Manual);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            SdwEvent::OverrideChanged { enabled: true, .. }
        ));
    }
}
