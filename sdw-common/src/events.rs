//! Event types for the SDW event stream

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pump status
///
/// Wire names match what the operational dashboard expects
/// (`"OFF"` and `"Running"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PumpStatus {
    #[default]
    #[serde(rename = "OFF")]
    Off,
    #[serde(rename = "Running")]
    Running,
}

impl PumpStatus {
    pub fn is_running(self) -> bool {
        self == PumpStatus::Running
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PumpStatus::Off => "OFF",
            PumpStatus::Running => "Running",
        }
    }
}

impl fmt::Display for PumpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who changed the pump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// Predictor recommendation accepted inside the hysteresis rules
    Predictor,
    /// Critical-low interlock
    EmergencyFloor,
    /// Near-full interlock
    SafetyCeiling,
    /// Start/stop command from an operator
    Manual,
    /// Test scenario injection
    Scenario,
    /// System reset
    Reset,
}

/// SDW event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SdwEvent {
    /// Pump switched on or off
    PumpStateChanged {
        previous: PumpStatus,
        current: PumpStatus,
        source: ChangeSource,
        water_level: f64,
        timestamp: DateTime<Utc>,
    },

    /// Manual override switched on or off (including expiry)
    OverrideChanged {
        enabled: bool,
        until: Option<DateTime<Utc>>,
        expired: bool,
        timestamp: DateTime<Utc>,
    },

    /// State returned to defaults
    SystemReset {
        timestamp: DateTime<Utc>,
    },

    /// Named test scenario applied
    ScenarioApplied {
        scenario: String,
        water_level: f64,
        pump_status: PumpStatus,
        timestamp: DateTime<Utc>,
    },

    /// Control loop committed a tick
    TickCompleted {
        water_level: f64,
        pump_status: PumpStatus,
        ai_prediction: u8,
        timestamp: DateTime<Utc>,
    },
}

impl SdwEvent {
    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            SdwEvent::PumpStateChanged { .. } => "PumpStateChanged",
            SdwEvent::OverrideChanged { .. } => "OverrideChanged",
            SdwEvent::SystemReset { .. } => "SystemReset",
            SdwEvent::ScenarioApplied { .. } => "ScenarioApplied",
            SdwEvent::TickCompleted { .. } => "TickCompleted",
        }
    }
}
