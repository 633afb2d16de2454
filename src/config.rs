//! Konfiguration
//!
//! Alle Werte haben sinnvolle Defaults und können über Umgebungsvariablen
//! überschrieben werden.

use crate::call_engine::AudioRoute;
use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Gültigkeit einer Push-Registrierung in Tagen
pub const DEFAULT_REGISTRATION_TTL_DAYS: i64 = 365;

/// Anzeigedauer eines Warn-Banners
pub const DEFAULT_WARNING_DISPLAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Lokalen Freiton abspielen, wenn die Gegenseite keinen liefert
    pub ringback_fallback: bool,
    pub warning_display: Duration,
    pub registration_ttl_days: i64,
    /// Route beim Verbinden, solange der Benutzer nichts anderes wählt
    pub default_route: AudioRoute,
    /// Kapazität des CallEvent-Broadcast-Kanals
    pub event_capacity: usize,
    pub log_filter: String,
    /// Speicherort des Registrierungs-Zustands (None = App-Datenverzeichnis)
    pub registration_file: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ringback_fallback: false,
            warning_display: DEFAULT_WARNING_DISPLAY,
            registration_ttl_days: DEFAULT_REGISTRATION_TTL_DAYS,
            default_route: AudioRoute::Receiver,
            event_capacity: 100,
            log_filter: "call_coordinator=debug".to_string(),
            registration_file: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn load_from_env() -> Result<Self> {
        let defaults = Self::default();

        let ringback_fallback = match env::var("CALL_RINGBACK_FALLBACK") {
            Ok(value) => parse_bool(&value).context("Invalid CALL_RINGBACK_FALLBACK")?,
            Err(_) => defaults.ringback_fallback,
        };

        let warning_display = match env::var("CALL_WARNING_DISPLAY_SECS") {
            Ok(value) => Duration::from_secs(
                value
                    .parse::<u64>()
                    .context("Invalid CALL_WARNING_DISPLAY_SECS")?,
            ),
            Err(_) => defaults.warning_display,
        };

        let registration_ttl_days = match env::var("PUSH_REGISTRATION_TTL_DAYS") {
            Ok(value) => value
                .parse::<i64>()
                .context("Invalid PUSH_REGISTRATION_TTL_DAYS")?,
            Err(_) => defaults.registration_ttl_days,
        };
        if registration_ttl_days <= 0 {
            bail!("PUSH_REGISTRATION_TTL_DAYS must be positive");
        }

        let default_route = match env::var("CALL_DEFAULT_ROUTE") {
            Ok(value) => parse_route(&value).context("Invalid CALL_DEFAULT_ROUTE")?,
            Err(_) => defaults.default_route,
        };

        let event_capacity = match env::var("CALL_EVENT_CAPACITY") {
            Ok(value) => value
                .parse::<usize>()
                .context("Invalid CALL_EVENT_CAPACITY")?,
            Err(_) => defaults.event_capacity,
        };
        if event_capacity == 0 {
            bail!("CALL_EVENT_CAPACITY must be greater than zero");
        }

        Ok(Self {
            ringback_fallback,
            warning_display,
            registration_ttl_days,
            default_route,
            event_capacity,
            log_filter: env::var("RUST_LOG").unwrap_or(defaults.log_filter),
            registration_file: env::var("PUSH_REGISTRATION_FILE").ok().map(PathBuf::from),
        })
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{}'", other),
    }
}

fn parse_route(value: &str) -> Result<AudioRoute> {
    match value.trim().to_ascii_lowercase().as_str() {
        "receiver" => Ok(AudioRoute::Receiver),
        "speaker" => Ok(AudioRoute::Speaker),
        other => bail!("expected 'receiver' or 'speaker', got '{}'", other),
    }
}
