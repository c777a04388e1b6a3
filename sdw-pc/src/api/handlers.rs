//! HTTP request handlers
//!
//! Thin wrappers over [`SharedState`](crate::state::SharedState). Numeric
//! fields are rounded for display here; the stored values are untouched.

use crate::api::server::AppContext;
use crate::error::ApiError;
use crate::predictor::ModelInfo;
use crate::state::{PumpStatus, Scenario, SystemState, Weather, WeatherSource};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    version: String,
    git_hash: String,
    build_timestamp: String,
    build_profile: String,
}

#[derive(Debug, Serialize)]
pub struct MonthlyValue {
    month: &'static str,
    value: u32,
}

#[derive(Debug, Serialize)]
pub struct SystemHealth {
    ai_model_status: &'static str,
    sensor_status: &'static str,
    weather_source: WeatherSource,
    pump_health: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pump_status: PumpStatus,
    water_level: f64,
    water_percentage: f64,
    solar: f64,
    hybrid: f64,
    co2_saved: f64,
    ai_prediction: u8,
    ai_confidence: f64,
    manual_override: bool,
    manual_override_until: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
    weather: Weather,
    energy: Vec<MonthlyValue>,
    demand: Vec<MonthlyValue>,
    system_health: SystemHealth,
}

#[derive(Debug, Serialize)]
pub struct AiStatusResponse {
    #[serde(flatten)]
    model: ModelInfo,
    last_prediction: u8,
    confidence: f64,
}

#[derive(Debug, Serialize)]
pub struct PumpCommandResponse {
    message: String,
    manual_override: bool,
    ai_resumes_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    #[serde(default)]
    enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct OverrideResponse {
    manual_override: bool,
    message: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct WaterLevelRequest {
    #[serde(default = "default_test_level")]
    level: f64,
}

fn default_test_level() -> f64 {
    3.5
}

#[derive(Debug, Serialize)]
pub struct WaterLevelResponse {
    message: String,
    water_level: f64,
    water_percentage: f64,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioRequest {
    #[serde(default = "default_scenario")]
    scenario: String,
}

fn default_scenario() -> String {
    Scenario::Normal.name().to_string()
}

#[derive(Debug, Serialize)]
pub struct ScenarioResponse {
    message: String,
    water_level: f64,
    pump_status: PumpStatus,
}

// ============================================================================
// Display helpers
// ============================================================================

const ENERGY_SERIES: [(&str, u32); 6] = [
    ("Jan", 100),
    ("Feb", 150),
    ("Mar", 200),
    ("Apr", 180),
    ("May", 220),
    ("Jun", 190),
];

const DEMAND_SERIES: [(&str, u32); 6] = [
    ("Jan", 80),
    ("Feb", 120),
    ("Mar", 180),
    ("Apr", 160),
    ("May", 200),
    ("Jun", 170),
];

fn monthly(series: &[(&'static str, u32)]) -> Vec<MonthlyValue> {
    series
        .iter()
        .map(|&(month, value)| MonthlyValue { month, value })
        .collect()
}

/// Round half away from zero to `places` decimals
fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn display_weather(weather: &Weather) -> Weather {
    Weather {
        temperature: round_to(weather.temperature, 1),
        humidity: round_to(weather.humidity, 0),
        solar_irradiance: round_to(weather.solar_irradiance, 0),
        rainfall: round_to(weather.rainfall, 1),
    }
}

fn status_response(state: &SystemState, model_loaded: bool) -> StatusResponse {
    StatusResponse {
        pump_status: state.pump_status,
        water_level: round_to(state.water_level(), 2),
        water_percentage: round_to(state.water_percentage(), 1),
        solar: round_to(state.solar_power, 2),
        hybrid: round_to(state.hybrid_usage, 1),
        co2_saved: round_to(state.co2_saved, 1),
        ai_prediction: state.ai_prediction,
        ai_confidence: round_to(state.ai_confidence, 3),
        manual_override: state.manual_override,
        manual_override_until: state.manual_override_until,
        last_updated: state.last_updated,
        weather: display_weather(&state.weather),
        energy: monthly(&ENERGY_SERIES),
        demand: monthly(&DEMAND_SERIES),
        system_health: SystemHealth {
            ai_model_status: if model_loaded { "Active" } else { "Fallback" },
            sensor_status: "Simulated",
            weather_source: state.weather_source,
            pump_health: if state.last_tick_failed { "Degraded" } else { "Good" },
        },
    }
}

// ============================================================================
// Health and build info
// ============================================================================

/// GET /api/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "sdw-pc".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/build_info
pub async fn get_build_info() -> Json<BuildInfo> {
    Json(BuildInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
    })
}

// ============================================================================
// Status
// ============================================================================

/// GET /api/status
pub async fn get_status(State(ctx): State<AppContext>) -> Json<StatusResponse> {
    let snapshot = ctx.state.snapshot().await;
    let model_loaded = ctx.predictor.info().model_loaded;
    Json(status_response(&snapshot, model_loaded))
}

/// GET /api/ai-status
pub async fn get_ai_status(State(ctx): State<AppContext>) -> Json<AiStatusResponse> {
    let snapshot = ctx.state.snapshot().await;
    Json(AiStatusResponse {
        model: ctx.predictor.info(),
        last_prediction: snapshot.ai_prediction,
        confidence: round_to(snapshot.ai_confidence, 3),
    })
}

// ============================================================================
// Pump commands
// ============================================================================

/// POST /api/start-pump
pub async fn start_pump(
    State(ctx): State<AppContext>,
) -> Result<Json<PumpCommandResponse>, ApiError> {
    let cmd = ctx.state.start_pump().await?;
    Ok(Json(PumpCommandResponse {
        message: "Pump started successfully".to_string(),
        manual_override: true,
        ai_resumes_at: cmd.until,
    }))
}

/// POST /api/stop-pump
pub async fn stop_pump(
    State(ctx): State<AppContext>,
) -> Result<Json<PumpCommandResponse>, ApiError> {
    let cmd = ctx.state.stop_pump().await?;
    Ok(Json(PumpCommandResponse {
        message: "Pump stopped successfully".to_string(),
        manual_override: true,
        ai_resumes_at: cmd.until,
    }))
}

/// POST /api/manual-override `{"enabled": bool}`
pub async fn set_manual_override(
    State(ctx): State<AppContext>,
    body: Result<Json<OverrideRequest>, JsonRejection>,
) -> Result<Json<OverrideResponse>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let enabled = ctx.state.set_manual_override(req.enabled).await;
    Ok(Json(OverrideResponse {
        manual_override: enabled,
        message: format!(
            "Manual override {}",
            if enabled { "enabled" } else { "disabled" }
        ),
    }))
}

/// POST /api/reset-system
pub async fn reset_system(State(ctx): State<AppContext>) -> Json<MessageResponse> {
    ctx.state.reset().await;
    Json(MessageResponse {
        message: "System reset successfully".to_string(),
    })
}

// ============================================================================
// Test injection
// ============================================================================

/// POST /api/test/set-water-level `{"level": number}`
pub async fn set_water_level(
    State(ctx): State<AppContext>,
    body: Result<Json<WaterLevelRequest>, JsonRejection>,
) -> Result<Json<WaterLevelResponse>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let (level, percentage) = ctx.state.set_water_level(req.level).await?;
    Ok(Json(WaterLevelResponse {
        message: format!("Water level set to {:.2}", level),
        water_level: level,
        water_percentage: percentage,
    }))
}

/// POST /api/test/simulate-scenario `{"scenario": name}`
pub async fn simulate_scenario(
    State(ctx): State<AppContext>,
    body: Result<Json<ScenarioRequest>, JsonRejection>,
) -> Result<Json<ScenarioResponse>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let scenario: Scenario = req.scenario.parse()?;
    let (level, pump_status) = ctx.state.apply_scenario(scenario).await?;
    Ok(Json(ScenarioResponse {
        message: format!("Scenario '{}' applied", scenario.name()),
        water_level: level,
        pump_status,
    }))
}
