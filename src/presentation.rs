//! Presentation State
//!
//! Read-only Projektion von Registry und Coordinator-Zustand auf das, was die
//! Oberfläche anzeigt (Call-Button, Mikrofon, Audio-Route, Warn-Banner).

use crate::call_engine::{AudioRoute, AudioRoutePolicy, CallId, CallRegistry, CallState};
use serde::Serialize;

/// Beschriftung des Haupt-Buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallButton {
    Call,
    Ringing,
    Reconnecting,
    HangUp,
}

impl CallButton {
    pub fn label(&self) -> &'static str {
        match self {
            CallButton::Call => "Call",
            CallButton::Ringing => "Ringing",
            CallButton::Reconnecting => "Reconnecting",
            CallButton::HangUp => "Hang Up",
        }
    }
}

/// Kurzzeitig angezeigte Warnung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarningBanner {
    pub message: String,
    /// Steigt mit jeder neuen Warnung; ein verspätetes Ausblenden prüft sie
    pub generation: u64,
}

/// UI-Flags, die nicht aus dem Registry ableitbar sind
#[derive(Debug, Clone, Default)]
pub struct PresentationFlags {
    pub warning: Option<WarningBanner>,
    pub permission_alert: bool,
    pub(crate) warning_generation: u64,
}

impl PresentationFlags {
    /// Zeigt eine neue Warnung an und gibt deren Generation zurück
    pub fn show_warning(&mut self, message: String) -> u64 {
        self.warning_generation += 1;
        self.warning = Some(WarningBanner {
            message,
            generation: self.warning_generation,
        });
        self.warning_generation
    }

    /// Blendet die Warnung aus, falls sie nicht inzwischen ersetzt wurde
    pub fn clear_warning(&mut self, generation: u64) -> bool {
        match &self.warning {
            Some(banner) if banner.generation == generation => {
                self.warning = None;
                true
            }
            _ => false,
        }
    }
}

/// Von außen beobachtbarer Zustand
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationState {
    pub call_button: CallButton,
    pub call_button_label: &'static str,
    pub microphone_on: bool,
    pub route: AudioRoute,
    pub route_label: String,
    pub route_icon: &'static str,
    pub available_routes: Vec<AudioRoute>,
    pub warning: Option<String>,
    pub loading: bool,
    pub permission_alert: bool,
    pub active_call: Option<CallId>,
    pub incoming_caller: Option<String>,
}

impl PresentationState {
    /// Berechnet den Zustand aus einer konsistenten Momentaufnahme
    pub fn project(
        registry: &CallRegistry,
        routes: &AudioRoutePolicy,
        flags: &PresentationFlags,
    ) -> Self {
        let active = registry.active_session();

        let call_button = match active.map(|s| s.state) {
            Some(CallState::Ringing) => CallButton::Ringing,
            Some(CallState::Connected) => CallButton::HangUp,
            Some(CallState::Reconnecting) => CallButton::Reconnecting,
            _ => CallButton::Call,
        };
        let loading = matches!(
            active.map(|s| s.state),
            Some(CallState::Connecting | CallState::Ringing)
        );
        let route = routes.current().clone();

        Self {
            call_button,
            call_button_label: call_button.label(),
            microphone_on: active.map(|s| !s.muted).unwrap_or(true),
            route_label: route.label().to_string(),
            route_icon: route.icon(),
            route,
            available_routes: routes.available().to_vec(),
            warning: flags.warning.as_ref().map(|w| w.message.clone()),
            loading,
            permission_alert: flags.permission_alert,
            active_call: active.map(|s| s.id),
            incoming_caller: registry.latest_invite().map(|i| i.caller_name.clone()),
        }
    }
}
