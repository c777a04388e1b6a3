//! Pump decision policy
//!
//! Pure function from (current pump/override state, predictor output, now) to
//! the pump command and override state for this tick. Rules are evaluated in
//! strict priority order:
//!
//! 1. Override expiry: an override whose `until` has passed is cleared.
//! 2. Active override: automatic rules are skipped, pump left as commanded.
//! 3. Emergency floor: reading ≤ floor and pump not running → start.
//! 4. Safety ceiling: reading ≥ ceiling and pump running → stop.
//! 5. Predictor with hysteresis: ON honoured only at or below the turn-on
//!    threshold, OFF honoured only at or above the turn-off threshold.
//!
//! The interlocks (3, 4) never consult the predictor. Thresholds must satisfy
//! `floor < turn_on < turn_off < ceiling`; `TomlConfig::validate` rejects any
//! other ordering at startup.

use chrono::{DateTime, Utc};
use sdw_common::config::ControlConfig;
use sdw_common::events::ChangeSource;

use crate::state::PumpStatus;

/// Decision thresholds, all in sensor reading units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlThresholds {
    pub emergency_floor: f64,
    pub pump_on: f64,
    pub pump_off: f64,
    pub safety_ceiling: f64,
}

impl ControlThresholds {
    pub fn from_config(control: &ControlConfig) -> Self {
        Self {
            emergency_floor: control.emergency_floor,
            pump_on: control.pump_on_threshold,
            pump_off: control.pump_off_threshold,
            safety_ceiling: control.safety_ceiling,
        }
    }
}

impl Default for ControlThresholds {
    fn default() -> Self {
        Self::from_config(&ControlConfig::default())
    }
}

/// Everything the policy looks at
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput {
    pub pump_status: PumpStatus,
    pub water_level: f64,
    pub manual_override: bool,
    pub manual_override_until: Option<DateTime<Utc>>,
    pub prediction: u8,
    pub confidence: f64,
    pub now: DateTime<Utc>,
}

/// Which rule settled the tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Manual override still active; automation skipped
    OverrideActive,
    EmergencyFloor,
    SafetyCeiling,
    /// Predictor ON accepted inside the turn-on zone
    PredictorStart,
    /// Predictor OFF accepted inside the turn-off zone
    PredictorStop,
    /// No rule changed anything
    Hold,
}

impl Rule {
    /// Event attribution for a pump change made by this rule
    pub fn change_source(self) -> Option<ChangeSource> {
        match self {
            Rule::EmergencyFloor => Some(ChangeSource::EmergencyFloor),
            Rule::SafetyCeiling => Some(ChangeSource::SafetyCeiling),
            Rule::PredictorStart | Rule::PredictorStop => Some(ChangeSource::Predictor),
            Rule::OverrideActive | Rule::Hold => None,
        }
    }
}

/// Outcome of one policy evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub pump_status: PumpStatus,
    pub manual_override: bool,
    pub manual_override_until: Option<DateTime<Utc>>,
    /// The override was cleared by rule 1 this tick
    pub override_expired: bool,
    pub rule: Rule,
}

impl Decision {
    pub fn pump_changed(&self, before: PumpStatus) -> bool {
        self.pump_status != before
    }
}

/// Evaluate the rules for one tick
pub fn decide(input: &PolicyInput, thresholds: &ControlThresholds) -> Decision {
    let mut manual_override = input.manual_override;
    let mut manual_override_until = input.manual_override_until;
    let mut override_expired = false;

    // 1. Override expiry
    if manual_override {
        if let Some(until) = manual_override_until {
            if input.now > until {
                manual_override = false;
                manual_override_until = None;
                override_expired = true;
            }
        }
    }

    let settle = |pump_status, rule| Decision {
        pump_status,
        manual_override,
        manual_override_until,
        override_expired,
        rule,
    };

    // 2. Human control wins while active
    if manual_override {
        return settle(input.pump_status, Rule::OverrideActive);
    }

    let level = input.water_level;
    let running = input.pump_status.is_running();

    // 3. Emergency floor
    if level <= thresholds.emergency_floor && !running {
        return settle(PumpStatus::Running, Rule::EmergencyFloor);
    }

    // 4. Safety ceiling
    if level >= thresholds.safety_ceiling && running {
        return settle(PumpStatus::Off, Rule::SafetyCeiling);
    }

    // 5. Predictor with hysteresis
    match (input.prediction, running) {
        (1, false) if level <= thresholds.pump_on => {
            settle(PumpStatus::Running, Rule::PredictorStart)
        }
        (0, true) if level >= thresholds.pump_off => settle(PumpStatus::Off, Rule::PredictorStop),
        _ => settle(input.pump_status, Rule::Hold),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn input(pump_status: PumpStatus, water_level: f64, prediction: u8) -> PolicyInput {
        PolicyInput {
            pump_status,
            water_level,
            manual_override: false,
            manual_override_until: None,
            prediction,
            confidence: 0.9,
            now: now(),
        }
    }

    fn run(input: PolicyInput) -> Decision {
        decide(&input, &ControlThresholds::default())
    }

    #[test]
    fn test_emergency_floor_overrides_predictor_off() {
        let d = run(input(PumpStatus::Off, 1.0, 0));
        assert_eq!(d.pump_status, PumpStatus::Running);
        assert_eq!(d.rule, Rule::EmergencyFloor);
    }

    #[test]
    fn test_safety_ceiling_overrides_predictor_on() {
        let d = run(input(PumpStatus::Running, 5.8, 1));
        assert_eq!(d.pump_status, PumpStatus::Off);
        assert_eq!(d.rule, Rule::SafetyCeiling);
    }

    #[test]
    fn test_predictor_on_honoured_at_turn_on_threshold() {
        let d = run(input(PumpStatus::Off, 3.5, 1));
        assert_eq!(d.pump_status, PumpStatus::Running);
        assert_eq!(d.rule, Rule::PredictorStart);
    }

    #[test]
    fn test_predictor_on_ignored_above_turn_on_threshold() {
        let d = run(input(PumpStatus::Off, 3.51, 1));
        assert_eq!(d.pump_status, PumpStatus::Off);
        assert_eq!(d.rule, Rule::Hold);
    }

    #[test]
    fn test_predictor_off_honoured_at_turn_off_threshold() {
        let d = run(input(PumpStatus::Running, 4.5, 0));
        assert_eq!(d.pump_status, PumpStatus::Off);
        assert_eq!(d.rule, Rule::PredictorStop);
    }

    #[test]
    fn test_predictor_off_ignored_below_turn_off_threshold() {
        let d = run(input(PumpStatus::Running, 4.49, 0));
        assert_eq!(d.pump_status, PumpStatus::Running);
        assert_eq!(d.rule, Rule::Hold);
    }

    #[test]
    fn test_active_override_skips_interlocks() {
        let mut i = input(PumpStatus::Off, 0.2, 1);
        i.manual_override = true;
        i.manual_override_until = Some(now() + Duration::minutes(3));

        let d = run(i);
        assert_eq!(d.pump_status, PumpStatus::Off);
        assert_eq!(d.rule, Rule::OverrideActive);
        assert!(d.manual_override);
        assert!(!d.override_expired);
    }

    #[test]
    fn test_untimed_override_never_expires() {
        let mut i = input(PumpStatus::Running, 5.9, 0);
        i.manual_override = true;

        let d = run(i);
        assert_eq!(d.pump_status, PumpStatus::Running);
        assert_eq!(d.rule, Rule::OverrideActive);
    }

    #[test]
    fn test_expired_override_resumes_rules_same_tick() {
        let mut i = input(PumpStatus::Off, 0.8, 0);
        i.manual_override = true;
        i.manual_override_until = Some(now() - Duration::seconds(1));

        let d = run(i);
        assert!(d.override_expired);
        assert!(!d.manual_override);
        assert!(d.manual_override_until.is_none());
        assert_eq!(d.pump_status, PumpStatus::Running);
        assert_eq!(d.rule, Rule::EmergencyFloor);
    }

    #[test]
    fn test_override_expiring_exactly_now_is_still_active() {
        let mut i = input(PumpStatus::Off, 0.8, 0);
        i.manual_override = true;
        i.manual_override_until = Some(now());

        let d = run(i);
        assert!(!d.override_expired);
        assert_eq!(d.rule, Rule::OverrideActive);
    }

    #[test]
    fn test_stale_expiry_without_override_is_left_alone() {
        // Expiry only matters while the override flag is set
        let mut i = input(PumpStatus::Off, 3.0, 0);
        i.manual_override_until = Some(now() - Duration::minutes(1));

        let d = run(i);
        assert!(!d.override_expired);
        assert_eq!(d.manual_override_until, i.manual_override_until);
    }

    #[test]
    fn test_rule_change_sources() {
        assert_eq!(
            Rule::EmergencyFloor.change_source(),
            Some(ChangeSource::EmergencyFloor)
        );
        assert_eq!(Rule::PredictorStop.change_source(), Some(ChangeSource::Predictor));
        assert_eq!(Rule::Hold.change_source(), None);
    }
}
