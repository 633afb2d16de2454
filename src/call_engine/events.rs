//! Event- und Command-Typen des Coordinators
//!
//! Alle eingehenden Ereignisse (Benutzer, Push, Telefonie, OS Call-Manager)
//! werden als `CoordinatorEvent` über einen einzigen Eingang verarbeitet.
//! Ausgehend erzeugt der Coordinator Commands für die Telefonie, das Audio-
//! System und den OS Call-Manager sowie beobachtbare `CallEvent`s.

use super::audio::AudioRoute;
use super::registry::{CallId, CallInvite, CallState, DisconnectReason};
use super::warnings::QualityWarning;
use crate::presentation::PresentationState;
use std::collections::BTreeSet;

// ============================================================================
// INBOUND
// ============================================================================

/// Callbacks der Telefonie-Schicht für einen Anruf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyEvent {
    Ringing,
    Connected,
    Reconnecting { error: String },
    Reconnected,
    FailedToConnect { error: String },
    Disconnected { error: Option<String> },
    QualityWarnings {
        current: BTreeSet<QualityWarning>,
        previous: BTreeSet<QualityWarning>,
    },
}

/// Art einer beim OS angefragten Aktion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerRequest {
    ReportIncoming,
    StartCall,
    EndCall,
}

/// Art einer vom OS ausgeführten Aktion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    StartCall,
    AnswerCall,
    EndCall,
    SetHeld,
    SetMuted,
}

/// Mikrofon-Berechtigung des Benutzers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordPermission {
    #[default]
    Undetermined,
    Granted,
    Denied,
}

/// Alle Ereignisse, die der Coordinator verarbeitet
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    // --- Benutzer ---
    DialRequested { destination: String },
    AnswerRequested { id: CallId },
    HangUpRequested,
    SetMuteRequested { muted: bool },
    RouteToggleRequested,
    RouteRequested(AudioRoute),
    RecordPermissionChanged(RecordPermission),
    /// Hinweis zur Mikrofon-Berechtigung geschlossen
    PermissionAlertDismissed { dial_anyway: Option<String> },

    // --- Push ---
    InviteReceived(CallInvite),
    InviteCancelled { call_sid: String },

    // --- Telefonie ---
    Telephony { id: CallId, event: TelephonyEvent },

    // --- OS Call-Manager: Aktionen ---
    StartCallPerformed { id: CallId, destination: String },
    AnswerCallPerformed { id: CallId },
    EndCallPerformed { id: CallId },
    SetHeldPerformed { id: CallId, on_hold: bool },
    SetMutedPerformed { id: CallId, muted: bool },

    // --- OS Call-Manager: Sonstiges ---
    ProviderReset,
    AudioSessionActivated,
    AudioSessionDeactivated,
    ActionTimedOut { id: Option<CallId>, kind: ActionKind },
    RequestCompleted {
        id: CallId,
        request: ManagerRequest,
        result: Result<(), String>,
    },

    // --- Audio-System ---
    SystemRouteChanged {
        route: AudioRoute,
        available: Vec<AudioRoute>,
    },
}

// ============================================================================
// OUTBOUND
// ============================================================================

/// Commands an die Telefonie-Schicht
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyCommand {
    Connect { id: CallId, destination: String },
    Accept(CallInvite),
    Reject(CallInvite),
    Disconnect { id: CallId },
    SetOnHold { id: CallId, on_hold: bool },
    SetMuted { id: CallId, muted: bool },
}

/// Commands an das Audio-System
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioCommand {
    SetDeviceEnabled(bool),
    SelectRoute(AudioRoute),
    StartRingback,
    StopRingback,
}

/// Commands an den OS Call-Manager (über den Adapter)
#[derive(Debug, Clone, PartialEq)]
pub enum CallManagerCommand {
    ReportIncoming {
        id: CallId,
        caller: String,
        verified: bool,
    },
    RequestStartCall { id: CallId, handle: String },
    RequestEndCall { id: CallId },
    ReportOutgoingStarted { id: CallId },
    ReportOutgoingConnected { id: CallId },
    ReportEnded { id: CallId, reason: DisconnectReason },
}

/// Beobachtbare Ereignisse für UI und Host
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    StateChanged { id: CallId, state: CallState },
    InviteReceived { id: CallId, caller: String },
    InviteRemoved { id: CallId, reason: DisconnectReason },
    SessionEnded { id: CallId, reason: DisconnectReason },
    RouteChoiceRequired(Vec<AudioRoute>),
    PresentationChanged(PresentationState),
    Error(String),
}
