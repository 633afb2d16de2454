//! Call Manager Module - Anbindung an die System-Anruf-UI
//!
//! Dieses Modul verwaltet:
//! - Aktionen des OS Call-Managers (Start, Annehmen, Beenden, Halten, Stumm)
//! - Garantierten Abschluss jeder Aktion
//! - Berichte des Coordinators an den Call-Manager

mod action;
mod adapter;

pub use crate::call_engine::{ActionCompletion, ActionOutcome};
pub use action::ProviderAction;
pub use adapter::{
    CallManagerAdapter, CallProvider, EndedReason, ProviderError, ProviderRequest,
    RequestCallback,
};
