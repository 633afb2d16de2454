//! Push Module - Eingehende Anrufe per Voice-Push
//!
//! Dieses Modul verwaltet:
//! - Dekodieren der Push-Payloads
//! - Weiterleiten von Einladungen und Abbrüchen an den Coordinator
//! - Gültigkeit der Push-Registrierung

mod adapter;
mod messages;
mod registration;

pub use adapter::{PushError, PushEvent, PushInviteAdapter, PushMessage};
pub use messages::{CallPayload, CancelPayload, PushPayload, VERIFIED_STIR_STATUS};
pub use registration::{RegistrationState, RegistrationStore, RegistrationStoreError};
