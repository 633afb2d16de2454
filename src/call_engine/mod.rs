//! Call Engine Module - Anruf-Lebenszyklus
//!
//! Dieses Modul verwaltet:
//! - Registry aller Einladungen und Sessions
//! - Zustandsmaschine pro Anruf
//! - Audio-Routen-Entscheidung
//! - Qualitätswarnungen

mod audio;
mod completion;
mod engine;
mod events;
mod registry;
mod warnings;

pub use audio::{select, toggle, AudioError, AudioRoute, AudioRoutePolicy, RouteSelection};
pub use completion::{ActionCompletion, ActionOutcome};
pub use engine::{
    AudioController, CallCoordinator, CoordinatorError, TelephonyBackend, TelephonyError,
};
pub use events::{
    ActionKind, AudioCommand, CallEvent, CallManagerCommand, CoordinatorEvent, ManagerRequest,
    RecordPermission, TelephonyCommand, TelephonyEvent,
};
pub use registry::{
    CallDirection, CallId, CallInvite, CallRegistry, CallSession, CallState, DisconnectReason,
    PendingAction,
};
pub use warnings::{QualityWarning, WarningDiff};

#[cfg(test)]
pub(crate) mod testing;
