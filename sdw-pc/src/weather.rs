//! Weather provider
//!
//! Current conditions at the site from Open-Meteo, with a synthetic
//! pseudo-periodic signal substituted whenever the live call fails. Callers
//! always get a sample; failures are logged here and never propagated.

use async_trait::async_trait;
use rand::Rng;
use sdw_common::config::WeatherConfig;
use sdw_common::Clock;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::state::{Weather, WeatherSource};

const USER_AGENT: &str = concat!("sdw-pc/", env!("CARGO_PKG_VERSION"));
const CURRENT_FIELDS: &str =
    "temperature_2m,relative_humidity_2m,precipitation,shortwave_radiation";

/// Weather sample plus where it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherSample {
    pub weather: Weather,
    pub source: WeatherSource,
}

/// Anything that can report current conditions
///
/// Implementations must not fail and must return within a bounded time.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current(&self) -> WeatherSample;
}

/// Open-Meteo client errors
#[derive(Debug, Error)]
pub enum WeatherError {
    /// Network communication error (includes timeouts)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Open-Meteo returned a non-success status
    #[error("API error {0}")]
    ApiError(u16),

    /// Failed to parse API response JSON
    #[error("Parse error: {0}")]
    ParseError(String),
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    current: Option<OpenMeteoCurrent>,
}

/// `current` block; any field may be missing
#[derive(Debug, Default, Deserialize)]
struct OpenMeteoCurrent {
    temperature_2m: Option<f64>,
    relative_humidity_2m: Option<f64>,
    precipitation: Option<f64>,
    shortwave_radiation: Option<f64>,
}

impl OpenMeteoCurrent {
    fn into_weather(self) -> Weather {
        let defaults = Weather::default();
        Weather {
            temperature: self.temperature_2m.unwrap_or(defaults.temperature),
            humidity: self.relative_humidity_2m.unwrap_or(defaults.humidity),
            solar_irradiance: self
                .shortwave_radiation
                .unwrap_or(defaults.solar_irradiance),
            rainfall: self.precipitation.unwrap_or(defaults.rainfall),
        }
    }
}

/// Parse an Open-Meteo response body
fn parse_response(body: &str) -> std::result::Result<Weather, WeatherError> {
    let response: OpenMeteoResponse =
        serde_json::from_str(body).map_err(|e| WeatherError::ParseError(e.to_string()))?;
    Ok(response.current.unwrap_or_default().into_weather())
}

/// Synthetic conditions at `unix_secs`
///
/// Slow sinusoids with bounded noise: temperature 28 ± 5 (period ~6.3 h),
/// humidity 65 ± 15, irradiance 400 ± 300 floored at 0, rainfall floored at 0.
pub fn synthetic_weather<R: Rng + ?Sized>(unix_secs: f64, rng: &mut R) -> Weather {
    Weather {
        temperature: 28.0 + 5.0 * (unix_secs / 3600.0).sin() + rng.gen_range(-2.0..=2.0),
        humidity: 65.0 + 15.0 * (unix_secs / 7200.0).sin() + rng.gen_range(-5.0..=5.0),
        solar_irradiance: (400.0 + 300.0 * (unix_secs / 1800.0).sin()
            + rng.gen_range(-50.0..=50.0))
        .max(0.0),
        rainfall: (2.0 * (unix_secs / 5400.0).sin() + rng.gen_range(-1.0..=2.0)).max(0.0),
    }
}

fn synthetic_sample(clock: &dyn Clock) -> WeatherSample {
    let now = clock.now();
    let unix_secs = now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0;
    WeatherSample {
        weather: synthetic_weather(unix_secs, &mut rand::thread_rng()),
        source: WeatherSource::Synthetic,
    }
}

/// Open-Meteo "current conditions" client
pub struct OpenMeteoClient {
    http_client: reqwest::Client,
    base_url: String,
    latitude: f64,
    longitude: f64,
    clock: Arc<dyn Clock>,
}

impl OpenMeteoClient {
    pub fn new(config: &WeatherConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create weather HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.clone(),
            latitude: config.latitude,
            longitude: config.longitude,
            clock,
        })
    }

    /// One live request; errors are returned, not masked
    pub async fn fetch(&self) -> std::result::Result<Weather, WeatherError> {
        let response = self
            .http_client
            .get(&self.base_url)
            .query(&[
                ("latitude", self.latitude.to_string()),
                ("longitude", self.longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
            ])
            .send()
            .await
            .map_err(|e| WeatherError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::ApiError(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| WeatherError::NetworkError(e.to_string()))?;
        parse_response(&body)
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoClient {
    async fn current(&self) -> WeatherSample {
        match self.fetch().await {
            Ok(weather) if weather.is_finite() => {
                debug!(
                    "Weather: {:.1}°C, {:.0}% RH, {:.0} W/m², {:.1} mm",
                    weather.temperature,
                    weather.humidity,
                    weather.solar_irradiance,
                    weather.rainfall
                );
                WeatherSample {
                    weather,
                    source: WeatherSource::Live,
                }
            }
            Ok(weather) => {
                warn!("Weather API returned non-finite values {:?}, using synthetic data", weather);
                synthetic_sample(self.clock.as_ref())
            }
            Err(e) => {
                warn!("Weather API error: {}, using synthetic data", e);
                synthetic_sample(self.clock.as_ref())
            }
        }
    }
}

/// Offline provider: always the synthetic signal
pub struct SyntheticWeather {
    clock: Arc<dyn Clock>,
}

impl SyntheticWeather {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl WeatherProvider for SyntheticWeather {
    async fn current(&self) -> WeatherSample {
        synthetic_sample(self.clock.as_ref())
    }
}
