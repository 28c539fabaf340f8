//! OpenWeatherMap API client.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const OPENWEATHER_URL: &str = "https://api.openweathermap.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "metric" => Some(Units::Metric),
            "imperial" => Some(Units::Imperial),
            _ => None,
        }
    }

    pub fn temp(&self) -> &'static str {
        match self {
            Units::Metric => "°C",
            Units::Imperial => "°F",
        }
    }

    pub fn speed(&self) -> &'static str {
        match self {
            Units::Metric => "m/s",
            Units::Imperial => "mph",
        }
    }
}

/// What to look up: a free-text city name or coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    City(String),
    Coords { lat: f64, lon: f64 },
}

static COORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(-?\d{1,2}(?:\.\d+)?)\s*[,;]\s*(-?\d{1,3}(?:\.\d+)?)\s*$").expect("valid regex")
});

impl Location {
    /// `"48.85, 2.35"` becomes coordinates, anything else a city name.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        if let Some(caps) = COORDS.captures(input) {
            let lat: f64 = caps[1].parse().ok()?;
            let lon: f64 = caps[2].parse().ok()?;
            if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
                return Some(Location::Coords { lat, lon });
            }
        }
        Some(Location::City(input.to_string()))
    }

    pub fn cache_key(&self) -> String {
        match self {
            Location::City(c) => c.to_lowercase(),
            Location::Coords { lat, lon } => format!("{lat:.3},{lon:.3}"),
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Location::City(c) => vec![("q", c.clone())],
            Location::Coords { lat, lon } => vec![("lat", lat.to_string()), ("lon", lon.to_string())],
        }
    }
}

#[derive(Debug)]
pub enum WeatherError {
    MissingApiKey,
    InvalidApiKey,
    NotFound(String),
    Http(String),
    Api(String),
    Parse(String),
}

impl fmt::Display for WeatherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeatherError::MissingApiKey => write!(f, "API key is not configured"),
            WeatherError::InvalidApiKey => write!(f, "API key was rejected"),
            WeatherError::NotFound(q) => write!(f, "location not found: {q}"),
            WeatherError::Http(e) => write!(f, "HTTP error: {e}"),
            WeatherError::Api(e) => write!(f, "API error: {e}"),
            WeatherError::Parse(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for WeatherError {}

#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    pub main: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainReadings {
    pub temp: f64,
    pub feels_like: f64,
    #[serde(default)]
    pub temp_min: f64,
    #[serde(default)]
    pub temp_max: f64,
    pub pressure: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Wind {
    pub speed: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Sys {
    pub country: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentWeather {
    pub name: String,
    #[serde(default)]
    pub sys: Sys,
    pub weather: Vec<Condition>,
    pub main: MainReadings,
    pub wind: Wind,
    pub dt: i64,
    #[serde(default)]
    pub timezone: i64,
}

impl CurrentWeather {
    pub fn place(&self) -> String {
        match &self.sys.country {
            Some(c) if !c.is_empty() => format!("{}, {}", self.name, c),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ForecastResponse {
    list: Vec<ForecastEntry>,
    city: ForecastCity,
}

#[derive(Debug, Clone, Deserialize)]
struct ForecastEntry {
    dt: i64,
    main: MainReadings,
    weather: Vec<Condition>,
}

#[derive(Debug, Clone, Deserialize)]
struct ForecastCity {
    name: String,
    country: Option<String>,
    #[serde(default)]
    timezone: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayForecast {
    pub date: chrono::NaiveDate,
    pub min: f64,
    pub max: f64,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct Forecast {
    pub place: String,
    pub days: Vec<DayForecast>,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: Option<String>,
}

pub struct OpenWeatherClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenWeatherClient {
    pub fn new(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { http, base_url: base_url.trim_end_matches('/').to_string() }
    }

    async fn get(
        &self,
        path: &str,
        location: &Location,
        units: Units,
        lang: &str,
        api_key: &str,
    ) -> Result<String, WeatherError> {
        if api_key.is_empty() {
            return Err(WeatherError::MissingApiKey);
        }
        let mut query = location.query();
        query.push(("units", units.as_str().to_string()));
        query.push(("lang", lang.to_string()));
        query.push(("appid", api_key.to_string()));

        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(&query)
            .send()
            .await
            .map_err(|e| WeatherError::Http(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| WeatherError::Http(e.to_string()))?;
        debug!("OpenWeatherMap {path} status: {status}");

        match status.as_u16() {
            200 => Ok(body),
            401 => Err(WeatherError::InvalidApiKey),
            404 => Err(WeatherError::NotFound(location.cache_key())),
            _ => {
                let message = serde_json::from_str::<ApiMessage>(&body)
                    .ok()
                    .and_then(|m| m.message)
                    .unwrap_or(body);
                Err(WeatherError::Api(format!("{status}: {message}")))
            }
        }
    }

    pub async fn current(
        &self,
        location: &Location,
        units: Units,
        lang: &str,
        api_key: &str,
    ) -> Result<CurrentWeather, WeatherError> {
        info!("🌤️ Fetching weather for {:?}", location);
        let body = self.get("/data/2.5/weather", location, units, lang, api_key).await?;
        serde_json::from_str(&body).map_err(|e| WeatherError::Parse(e.to_string()))
    }

    pub async fn forecast(
        &self,
        location: &Location,
        units: Units,
        lang: &str,
        api_key: &str,
    ) -> Result<Forecast, WeatherError> {
        info!("📅 Fetching forecast for {:?}", location);
        let body = self.get("/data/2.5/forecast", location, units, lang, api_key).await?;
        let parsed: ForecastResponse =
            serde_json::from_str(&body).map_err(|e| WeatherError::Parse(e.to_string()))?;
        let place = match &parsed.city.country {
            Some(c) if !c.is_empty() => format!("{}, {}", parsed.city.name, c),
            _ => parsed.city.name.clone(),
        };
        Ok(Forecast { place, days: summarize_days(&parsed, 5) })
    }
}

/// Collapse the 3-hour entries into per-day min/max with the most common description.
fn summarize_days(resp: &ForecastResponse, max_days: usize) -> Vec<DayForecast> {
    let mut days: Vec<(chrono::NaiveDate, f64, f64, HashMap<String, usize>)> = Vec::new();

    for entry in &resp.list {
        let Some(local) = chrono::DateTime::from_timestamp(entry.dt + resp.city.timezone, 0) else {
            continue;
        };
        let date = local.date_naive();
        let low = entry.main.temp_min.min(entry.main.temp);
        let high = entry.main.temp_max.max(entry.main.temp);
        let description = entry.weather.first().map(|w| w.description.clone()).unwrap_or_default();

        match days.last_mut() {
            Some((d, min, max, counts)) if *d == date => {
                *min = min.min(low);
                *max = max.max(high);
                *counts.entry(description).or_default() += 1;
            }
            _ => {
                let mut counts = HashMap::new();
                counts.insert(description, 1);
                days.push((date, low, high, counts));
            }
        }
    }

    days.into_iter()
        .take(max_days)
        .map(|(date, min, max, counts)| {
            let description = counts
                .into_iter()
                .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
                .map(|(d, _)| d)
                .unwrap_or_default();
            DayForecast { date, min, max, description }
        })
        .collect()
}
