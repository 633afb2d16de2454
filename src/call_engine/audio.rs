//! Audio Route Policy
//!
//! Entscheidet, welche Audio-Ausgabe (Hörer, Lautsprecher, externes Gerät)
//! für einen Anruf gewählt wird. Das eigentliche Umschalten der Audio-Session
//! übernimmt der `AudioController` des Hosts.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Audio route not available: {0}")]
    RouteUnavailable(AudioRoute),

    #[error("Failed to change audio route: {0}")]
    RouteChangeFailed(String),
}

// ============================================================================
// AUDIO ROUTE
// ============================================================================

/// Gewünschte bzw. aktuelle Audio-Ausgabe
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioRoute {
    Speaker,
    /// Hörmuschel des Geräts
    Receiver,
    /// Benanntes externes Gerät (Bluetooth, Headset, CarPlay, ...)
    External(String),
}

impl AudioRoute {
    /// Beschriftung für den Routen-Button
    pub fn label(&self) -> &str {
        match self {
            AudioRoute::Speaker => "Speaker",
            AudioRoute::Receiver => "Receiver",
            AudioRoute::External(name) => name,
        }
    }

    /// Icon-Name für den Routen-Button
    pub fn icon(&self) -> &'static str {
        match self {
            AudioRoute::Speaker => "speaker.wave.3",
            AudioRoute::Receiver => "phone",
            AudioRoute::External(_) => "headphones",
        }
    }
}

impl fmt::Display for AudioRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ergebnis eines Umschalt-Wunsches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteSelection {
    /// Eindeutige Auswahl
    Selected(AudioRoute),
    /// Mehr als zwei Routen: der Benutzer muss explizit wählen
    ChooseFrom(Vec<AudioRoute>),
}

/// Wählt `intent`, sofern verfügbar; sonst den Hörer, sonst die erste Route.
pub fn select(intent: &AudioRoute, available: &[AudioRoute]) -> AudioRoute {
    if available.is_empty() || available.contains(intent) {
        return intent.clone();
    }
    if available.contains(&AudioRoute::Receiver) {
        return AudioRoute::Receiver;
    }
    available[0].clone()
}

/// Schaltet bei genau zwei Routen auf die jeweils andere um.
///
/// Bei drei oder mehr Routen wird nie implizit gewechselt.
pub fn toggle(current: &AudioRoute, available: &[AudioRoute]) -> RouteSelection {
    match available {
        [first, second] if current == first => RouteSelection::Selected(second.clone()),
        [first, second] if current == second => RouteSelection::Selected(first.clone()),
        [first, _] => RouteSelection::Selected(first.clone()),
        _ => RouteSelection::ChooseFrom(available.to_vec()),
    }
}

// ============================================================================
// POLICY
// ============================================================================

/// Zustand der Routen-Entscheidung
#[derive(Debug, Clone)]
pub struct AudioRoutePolicy {
    /// Vom System gemeldete aktuelle Route
    current: AudioRoute,
    available: Vec<AudioRoute>,
    /// Vom Benutzer gewählte Route für Anrufe
    preferred: AudioRoute,
}

impl AudioRoutePolicy {
    pub fn new(default_route: AudioRoute) -> Self {
        Self {
            current: default_route.clone(),
            available: vec![AudioRoute::Receiver, AudioRoute::Speaker],
            preferred: default_route,
        }
    }

    pub fn current(&self) -> &AudioRoute {
        &self.current
    }

    pub fn available(&self) -> &[AudioRoute] {
        &self.available
    }

    pub fn preferred(&self) -> &AudioRoute {
        &self.preferred
    }

    /// Route, die beim Verbinden eines Anrufs angefordert wird
    pub fn connect_route(&self) -> AudioRoute {
        select(&self.preferred, &self.available)
    }

    /// Umschalten durch den Benutzer
    pub fn toggle(&mut self) -> RouteSelection {
        let selection = toggle(&self.current, &self.available);
        if let RouteSelection::Selected(route) = &selection {
            self.preferred = route.clone();
            self.current = route.clone();
        }
        selection
    }

    /// Explizite Auswahl durch den Benutzer
    pub fn choose(&mut self, route: AudioRoute) -> Result<AudioRoute, AudioError> {
        if !self.available.contains(&route) {
            return Err(AudioError::RouteUnavailable(route));
        }
        self.preferred = route.clone();
        self.current = route.clone();
        Ok(route)
    }

    /// Vom System ausgelöster Routenwechsel.
    ///
    /// Wird nur beobachtet. Ohne aktiven Anruf übernimmt die Policy die neue
    /// Route als Vorgabe für den nächsten Anruf.
    pub fn on_automatic_route_change(
        &mut self,
        route: AudioRoute,
        available: Vec<AudioRoute>,
        call_active: bool,
    ) {
        if !available.is_empty() {
            self.available = available;
        }
        if !call_active {
            self.preferred = route.clone();
        }
        self.current = route;
    }
}

impl Default for AudioRoutePolicy {
    fn default() -> Self {
        Self::new(AudioRoute::Receiver)
    }
}
