//! Push Invite Adapter
//!
//! Dekodiert Voice-Push-Notifications in Einladungen bzw. Abbrüche und
//! leitet sie an den Coordinator weiter. Verwaltet außerdem, wann das
//! Device-Token neu registriert werden muss.

use super::messages::PushPayload;
use super::registration::{RegistrationState, RegistrationStore};
use crate::call_engine::{CallCoordinator, CallId, CallInvite, CoordinatorError, CoordinatorEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum PushError {
    #[error("Failed to decode push payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Push payload without call reference")]
    MissingCallSid,

    #[error("Push rejected by coordinator: {0}")]
    Rejected(#[from] CoordinatorError),
}

// ============================================================================
// EVENTS
// ============================================================================

/// Dekodierte Push-Nachricht
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Invite(CallInvite),
    Cancel { call_sid: String },
}

/// Beobachtbare Ereignisse des Push-Kanals
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    InviteDelivered { id: CallId, call_sid: String },
    CancelDelivered { call_sid: String },
    /// Payload verworfen, nicht fatal
    DecodeFailed(String),
    RegistrationRequired { device_token: Vec<u8> },
    Registered,
    Unregistered,
}

// ============================================================================
// ADAPTER
// ============================================================================

pub struct PushInviteAdapter {
    coordinator: Arc<CallCoordinator>,
    registration: Mutex<RegistrationState>,
    store: Option<RegistrationStore>,
    ttl_days: i64,
    event_tx: broadcast::Sender<PushEvent>,
}

impl PushInviteAdapter {
    /// Erstellt den Adapter; ein vorhandener Registrierungs-Zustand wird geladen.
    pub fn new(
        coordinator: Arc<CallCoordinator>,
        store: Option<RegistrationStore>,
        ttl_days: i64,
    ) -> Self {
        let registration = match &store {
            Some(store) => store.load().unwrap_or_else(|e| {
                tracing::warn!("Ignoring stored push registration: {}", e);
                RegistrationState::default()
            }),
            None => RegistrationState::default(),
        };
        let (event_tx, _) = broadcast::channel(32);

        Self {
            coordinator,
            registration: Mutex::new(registration),
            store,
            ttl_days,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.event_tx.subscribe()
    }

    pub fn registration(&self) -> RegistrationState {
        self.registration.lock().clone()
    }

    /// Dekodiert eine rohe Push-Payload
    pub fn decode(payload: &[u8]) -> Result<PushMessage, PushError> {
        match serde_json::from_slice::<PushPayload>(payload)? {
            PushPayload::Call(call) if call.call_sid.is_empty() => Err(PushError::MissingCallSid),
            PushPayload::Call(call) => Ok(PushMessage::Invite(call.into_invite())),
            PushPayload::Cancel(cancel) if cancel.call_sid.is_empty() => {
                Err(PushError::MissingCallSid)
            }
            PushPayload::Cancel(cancel) => Ok(PushMessage::Cancel {
                call_sid: cancel.call_sid,
            }),
        }
    }

    /// Verarbeitet eine eingegangene Push-Notification.
    ///
    /// Fehler sind nie fatal: die Payload wird verworfen und der Registry
    /// bleibt unverändert.
    pub fn handle_payload(&self, payload: &[u8]) -> Result<PushMessage, PushError> {
        let message = match Self::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Discarding push payload: {}", e);
                let _ = self.event_tx.send(PushEvent::DecodeFailed(e.to_string()));
                return Err(e);
            }
        };

        match &message {
            PushMessage::Invite(invite) => {
                tracing::info!("Push invite {} for call {}", invite.call_sid, invite.id);
                self.coordinator
                    .handle(CoordinatorEvent::InviteReceived(invite.clone()))?;
                let _ = self.event_tx.send(PushEvent::InviteDelivered {
                    id: invite.id,
                    call_sid: invite.call_sid.clone(),
                });
            }
            PushMessage::Cancel { call_sid } => {
                tracing::info!("Push cancel for {}", call_sid);
                self.coordinator.handle(CoordinatorEvent::InviteCancelled {
                    call_sid: call_sid.clone(),
                })?;
                let _ = self.event_tx.send(PushEvent::CancelDelivered {
                    call_sid: call_sid.clone(),
                });
            }
        }
        Ok(message)
    }

    /// Neues Device-Token vom System. Gibt zurück, ob neu registriert werden muss.
    pub fn credentials_updated(&self, device_token: &[u8], now: DateTime<Utc>) -> bool {
        let required = self
            .registration
            .lock()
            .registration_required(device_token, now, self.ttl_days);

        if required {
            tracing::info!("Push registration required");
            let _ = self.event_tx.send(PushEvent::RegistrationRequired {
                device_token: device_token.to_vec(),
            });
        } else {
            tracing::debug!("Push registration still valid");
        }
        required
    }

    pub fn registration_succeeded(&self, device_token: &[u8], now: DateTime<Utc>) {
        let snapshot = {
            let mut registration = self.registration.lock();
            registration.record_binding(device_token, now);
            registration.clone()
        };
        tracing::info!("Push registration bound at {}", now);
        self.persist(&snapshot);
        let _ = self.event_tx.send(PushEvent::Registered);
    }

    /// Der Cache bleibt unverändert, damit der nächste Token-Update erneut registriert
    pub fn registration_failed(&self, error: &str) {
        tracing::error!("Push registration failed: {}", error);
    }

    pub fn credentials_invalidated(&self) {
        let snapshot = {
            let mut registration = self.registration.lock();
            registration.clear();
            registration.clone()
        };
        tracing::info!("Push credentials invalidated");
        self.persist(&snapshot);
        let _ = self.event_tx.send(PushEvent::Unregistered);
    }

    fn persist(&self, state: &RegistrationState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(state) {
                tracing::error!("Failed to save push registration: {}", e);
            }
        }
    }
}
