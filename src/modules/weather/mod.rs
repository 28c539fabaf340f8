//! Weather lookups backed by OpenWeatherMap.

pub mod client;
pub mod store;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::kernel::{
    Button, CallbackData, CallbackInvocation, CommandSpec, Incoming, Invocation, JsonStore, Keyboard, Module,
    ModuleContext, Outcome, Pending, Reply, html_escape,
};
use client::{CurrentWeather, Forecast, Location, OPENWEATHER_URL, OpenWeatherClient, Units, WeatherError};

const NAME: &str = "weather";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub api_key: String,
    pub language: String,
    pub default_units: Units,
    pub cache_ttl_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            language: "en".to_string(),
            default_units: Units::Metric,
            cache_ttl_secs: 1800,
        }
    }
}

#[derive(Clone)]
enum Cached {
    Current(CurrentWeather),
    Forecast(Forecast),
}

pub struct WeatherModule {
    client: OpenWeatherClient,
    config: JsonStore<WeatherConfig>,
    cache: Mutex<HashMap<String, (Instant, Cached)>>,
}

impl WeatherModule {
    pub fn new(ctx: &ModuleContext) -> Self {
        Self::with_base_url(ctx, OPENWEATHER_URL)
    }

    pub fn with_base_url(ctx: &ModuleContext, base_url: &str) -> Self {
        let config: JsonStore<WeatherConfig> = JsonStore::load_or_default(ctx.config_path(NAME));
        if config.get().api_key.is_empty()
            && let Ok(key) = std::env::var("OPENWEATHER_API_KEY")
            && !key.trim().is_empty()
        {
            if let Err(e) = config.update(|c| c.api_key = key.trim().to_string()) {
                warn!("Failed to store weather API key: {e}");
            }
        }
        Self {
            client: OpenWeatherClient::new(base_url),
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &str, ttl: Duration) -> Option<Cached> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        match cache.get(key) {
            Some((at, value)) if at.elapsed() < ttl => Some(value.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn remember(&self, key: String, value: Cached) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, (Instant::now(), value));
    }

    fn units_for(&self, ctx: &ModuleContext, user_id: i64) -> Units {
        store::prefs(&ctx.db, user_id)
            .ok()
            .and_then(|p| p.units)
            .unwrap_or(self.config.get().default_units)
    }

    async fn current(&self, location: &Location, units: Units) -> Result<CurrentWeather, WeatherError> {
        let cfg = self.config.get();
        let key = format!("current:{}:{}", units.as_str(), location.cache_key());
        if let Some(Cached::Current(w)) = self.cached(&key, Duration::from_secs(cfg.cache_ttl_secs)) {
            return Ok(w);
        }
        let w = self.client.current(location, units, &cfg.language, &cfg.api_key).await?;
        self.remember(key, Cached::Current(w.clone()));
        Ok(w)
    }

    async fn forecast(&self, location: &Location, units: Units) -> Result<Forecast, WeatherError> {
        let cfg = self.config.get();
        let key = format!("forecast:{}:{}", units.as_str(), location.cache_key());
        if let Some(Cached::Forecast(f)) = self.cached(&key, Duration::from_secs(cfg.cache_ttl_secs)) {
            return Ok(f);
        }
        let f = self.client.forecast(location, units, &cfg.language, &cfg.api_key).await?;
        self.remember(key, Cached::Forecast(f.clone()));
        Ok(f)
    }

    /// Current weather text and keyboard, or a user-facing error.
    async fn weather_view(&self, ctx: &ModuleContext, user_id: i64, query: &str) -> (String, Option<Keyboard>) {
        let Some(location) = Location::parse(query) else {
            return ("🏙️ Send me a city name.".to_string(), None);
        };
        let units = self.units_for(ctx, user_id);
        match self.current(&location, units).await {
            Ok(w) => {
                let favorites = store::favorites(&ctx.db, user_id).unwrap_or_default();
                let is_fav = favorites.iter().any(|f| f.eq_ignore_ascii_case(&w.name));
                (format_current(&w, units), Some(weather_keyboard(&w.name, is_fav)))
            }
            Err(e) => (error_text(&e, query), None),
        }
    }

    fn favorites_view(&self, ctx: &ModuleContext, user_id: i64) -> (String, Keyboard) {
        let favorites = match store::favorites(&ctx.db, user_id) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to load favorites: {e}");
                Vec::new()
            }
        };
        let mut kb = Keyboard::new();
        for city in &favorites {
            kb = kb.row(vec![
                Button::new(format!("🏙️ {city}"), CallbackData::with_arg(NAME, "get", city.clone())),
                Button::new("❌", CallbackData::with_arg(NAME, "fav_del", city.clone())),
            ]);
        }
        kb = kb.button("🔍 Search city", CallbackData::new(NAME, "search"));
        let text = if favorites.is_empty() {
            "⭐ <b>Favorite cities</b>\n\nNo favorites yet. Look up a city and tap ⭐.".to_string()
        } else {
            format!("⭐ <b>Favorite cities</b> ({}/{})", favorites.len(), store::MAX_FAVORITES)
        };
        (text, kb)
    }

    fn settings_view(&self, ctx: &ModuleContext, user_id: i64) -> (String, Keyboard) {
        let prefs = store::prefs(&ctx.db, user_id).unwrap_or_default();
        let units = prefs.units.unwrap_or(self.config.get().default_units);
        let text = format!(
            "⚙️ <b>Weather settings</b>\n\nDefault city: {}\nUnits: {} ({}, {})",
            html_escape(prefs.city.as_deref().unwrap_or("not set")),
            units.as_str(),
            units.temp(),
            units.speed()
        );
        let kb = Keyboard::new()
            .row(vec![
                Button::new("°C metric", CallbackData::with_arg(NAME, "units", "metric")),
                Button::new("°F imperial", CallbackData::with_arg(NAME, "units", "imperial")),
            ])
            .button("⭐ Favorites", CallbackData::new(NAME, "favorites"));
        (text, kb)
    }
}

#[async_trait]
impl Module for WeatherModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "Weather"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::public("weather", "Current weather: /weather <city>"),
            CommandSpec::admin("wkey", "Set the OpenWeatherMap API key"),
        ]
    }

    fn callback_prefixes(&self) -> &'static [&'static str] {
        &[NAME]
    }

    fn init(&self, ctx: &ModuleContext) -> rusqlite::Result<()> {
        store::init_schema(&ctx.db)
    }

    fn startup_notices(&self) -> Vec<String> {
        if self.config.get().api_key.is_empty() {
            vec!["⚠️ Weather: no OpenWeatherMap API key. Set one with /wkey.".to_string()]
        } else {
            Vec::new()
        }
    }

    async fn on_command(&self, ctx: &ModuleContext, inv: &Invocation) -> Outcome {
        let msg = &inv.msg;
        match inv.command.as_str() {
            "wkey" => {
                let Some(key) = inv.args.as_deref() else {
                    return vec![Reply::text("Usage: /wkey <api key>")];
                };
                match self.config.update(|c| c.api_key = key.trim().to_string()) {
                    Ok(()) => {
                        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
                        info!("🔑 Weather API key updated by {}", msg.user_id);
                        vec![Reply::text("✅ Weather API key saved.")]
                    }
                    Err(e) => {
                        error!("Failed to save weather config: {e}");
                        vec![Reply::text("❌ Could not save the API key.")]
                    }
                }
            }
            _ => {
                let query = match inv.args.clone() {
                    Some(q) => q,
                    None => match store::prefs(&ctx.db, msg.user_id) {
                        Ok(store::WeatherPrefs { city: Some(city), .. }) => city,
                        _ => {
                            ctx.pending.begin(msg.chat_id, msg.user_id, NAME, "city", Vec::new());
                            let (_, kb) = self.favorites_view(ctx, msg.user_id);
                            return vec![Reply::with_keyboard("🏙️ Send me a city name.", kb)];
                        }
                    },
                };
                let (text, kb) = self.weather_view(ctx, msg.user_id, &query).await;
                vec![match kb {
                    Some(kb) => Reply::with_keyboard(text, kb),
                    None => Reply::text(text),
                }]
            }
        }
    }

    async fn on_input(&self, ctx: &ModuleContext, msg: &Incoming, _pending: Pending) -> Outcome {
        let (text, kb) = self.weather_view(ctx, msg.user_id, &msg.text).await;
        vec![match kb {
            Some(kb) => Reply::with_keyboard(text, kb),
            None => Reply::text(text),
        }]
    }

    async fn on_callback(&self, ctx: &ModuleContext, cb: &CallbackInvocation) -> Outcome {
        let city = cb.data.arg().to_string();
        let user_id = cb.user_id;

        match cb.data.action.as_str() {
            "get" => {
                let (text, kb) = self.weather_view(ctx, user_id, &city).await;
                vec![Reply::edit(text, kb)]
            }
            "forecast" => {
                let Some(location) = Location::parse(&city) else {
                    return vec![Reply::notice("Unknown city")];
                };
                let units = self.units_for(ctx, user_id);
                let text = match self.forecast(&location, units).await {
                    Ok(f) => format_forecast(&f, units),
                    Err(e) => error_text(&e, &city),
                };
                let kb = Keyboard::new().button("⬅️ Back", CallbackData::with_arg(NAME, "get", city));
                vec![Reply::edit(text, Some(kb))]
            }
            "fav_add" => {
                let notice = match store::add_favorite(&ctx.db, user_id, &city) {
                    Ok(true) => Reply::notice(format!("⭐ {city} added to favorites")),
                    Ok(false) => Reply::alert(format!("You can keep at most {} favorites.", store::MAX_FAVORITES)),
                    Err(e) => {
                        error!("Failed to add favorite: {e}");
                        Reply::alert("❌ Could not save the favorite.")
                    }
                };
                let (text, kb) = self.weather_view(ctx, user_id, &city).await;
                vec![notice, Reply::edit(text, kb)]
            }
            "fav_del" => {
                if let Err(e) = store::remove_favorite(&ctx.db, user_id, &city) {
                    error!("Failed to remove favorite: {e}");
                    return vec![Reply::alert("❌ Could not remove the favorite.")];
                }
                let (text, kb) = self.favorites_view(ctx, user_id);
                vec![Reply::notice(format!("{city} removed")), Reply::edit(text, Some(kb))]
            }
            "default" => match store::set_default_city(&ctx.db, user_id, &city) {
                Ok(()) => vec![Reply::notice(format!("🏠 {city} is now your default city"))],
                Err(e) => {
                    error!("Failed to set default city: {e}");
                    vec![Reply::alert("❌ Could not save the default city.")]
                }
            },
            "favorites" => {
                let (text, kb) = self.favorites_view(ctx, user_id);
                vec![Reply::edit(text, Some(kb))]
            }
            "settings" => {
                let (text, kb) = self.settings_view(ctx, user_id);
                vec![Reply::edit(text, Some(kb))]
            }
            "units" => {
                let Some(units) = Units::parse(&city) else {
                    return vec![Reply::notice("Unknown units")];
                };
                if let Err(e) = store::set_units(&ctx.db, user_id, units) {
                    error!("Failed to save units: {e}");
                    return vec![Reply::alert("❌ Could not save the units.")];
                }
                let (text, kb) = self.settings_view(ctx, user_id);
                vec![Reply::notice(format!("Units: {}", units.as_str())), Reply::edit(text, Some(kb))]
            }
            "search" => {
                ctx.pending.begin(cb.chat_id, user_id, NAME, "city", Vec::new());
                vec![Reply::edit("🏙️ Send me a city name.", None)]
            }
            other => {
                warn!("Unknown weather action {other}");
                vec![Reply::notice("Unknown action")]
            }
        }
    }
}

fn condition_emoji(main: &str) -> &'static str {
    match main {
        "Clear" => "☀️",
        "Clouds" => "☁️",
        "Rain" => "🌧️",
        "Drizzle" => "🌦️",
        "Thunderstorm" => "⛈️",
        "Snow" => "❄️",
        "Mist" | "Fog" | "Haze" | "Smoke" => "🌫️",
        _ => "🌤️",
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn format_current(w: &CurrentWeather, units: Units) -> String {
    let condition = w.weather.first();
    let emoji = condition.map(|c| condition_emoji(&c.main)).unwrap_or("🌤️");
    let description = condition.map(|c| capitalize(&c.description)).unwrap_or_default();
    let updated = chrono::DateTime::from_timestamp(w.dt + w.timezone, 0)
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_default();

    format!(
        "{emoji} <b>Weather in {}</b>\n\n\
         🌡️ Temperature: <b>{:.1}{}</b> (feels like {:.1}{})\n\
         📝 Conditions: {}\n\
         💧 Humidity: {:.0}%\n\
         🌬️ Wind: {:.1} {}\n\
         🔵 Pressure: {:.0} hPa\n\
         🕐 Updated: {} local time",
        html_escape(&w.place()),
        w.main.temp,
        units.temp(),
        w.main.feels_like,
        units.temp(),
        html_escape(&description),
        w.main.humidity,
        w.wind.speed,
        units.speed(),
        w.main.pressure,
        updated,
    )
}

pub fn format_forecast(f: &Forecast, units: Units) -> String {
    let mut text = format!("📅 <b>Forecast for {}</b>\n", html_escape(&f.place));
    if f.days.is_empty() {
        text.push_str("\nNo forecast data.");
    }
    for day in &f.days {
        text.push_str(&format!(
            "\n<b>{}</b>: {:.0}{} … {:.0}{}, {}",
            day.date.format("%a %d.%m"),
            day.min,
            units.temp(),
            day.max,
            units.temp(),
            html_escape(&day.description)
        ));
    }
    text
}

fn weather_keyboard(city: &str, is_favorite: bool) -> Keyboard {
    let fav = if is_favorite {
        Button::new("💔 Unfavorite", CallbackData::with_arg(NAME, "fav_del", city))
    } else {
        Button::new("⭐ Favorite", CallbackData::with_arg(NAME, "fav_add", city))
    };
    Keyboard::new()
        .row(vec![
            Button::new("🔄 Refresh", CallbackData::with_arg(NAME, "get", city)),
            Button::new("📅 5 days", CallbackData::with_arg(NAME, "forecast", city)),
        ])
        .row(vec![fav, Button::new("🏠 Default", CallbackData::with_arg(NAME, "default", city))])
        .row(vec![
            Button::new("⭐ Favorites", CallbackData::new(NAME, "favorites")),
            Button::new("⚙️ Settings", CallbackData::new(NAME, "settings")),
        ])
}

fn error_text(e: &WeatherError, query: &str) -> String {
    match e {
        WeatherError::MissingApiKey => {
            "⚠️ Weather API key is not configured. An admin can set it with /wkey.".to_string()
        }
        WeatherError::NotFound(_) => format!("❌ City \"{}\" not found.", html_escape(query.trim())),
        other => {
            error!("Weather request failed: {other}");
            "❌ Could not get weather data. Try again later.".to_string()
        }
    }
}
