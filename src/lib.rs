//! Call Coordinator - Lebenszyklus von VoIP-Anrufen auf dem Client
//!
//! Führt drei unabhängige Ereignisquellen zu einem konsistenten Bild
//! zusammen, welche Anrufe existieren und in welchem Zustand sie sind:
//! - Voice-Push für eingehende Anrufe
//! - Telefonie-SDK (Signaling und Medien)
//! - OS Call-Manager (System-Anruf-UI und Audio-Session)

pub mod call_engine;
pub mod call_manager;
pub mod config;
pub mod presentation;
pub mod push;

use anyhow::{anyhow, bail, Context};
use call_engine::{AudioController, CallCoordinator, TelephonyBackend};
use call_manager::{CallManagerAdapter, CallProvider};
use config::CoordinatorConfig;
use once_cell::sync::OnceCell;
use push::{PushInviteAdapter, RegistrationStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialisiert das Logging. Ein zweiter Aufruf ändert nichts.
pub fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|e| {
        eprintln!("Invalid log filter '{}': {}", filter, e);
        EnvFilter::new("call_coordinator=debug")
    });
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Globaler Application State
pub struct AppState {
    config: CoordinatorConfig,
    coordinator: Arc<CallCoordinator>,
    call_manager: Arc<CallManagerAdapter>,
    push: Arc<PushInviteAdapter>,
}

/// Singleton für den AppState
static APP_STATE: OnceCell<Arc<AppState>> = OnceCell::new();

impl AppState {
    /// Initialisiert den Application State.
    ///
    /// Muss innerhalb einer Tokio-Runtime laufen: der Call-Manager-Adapter
    /// wird als Task gestartet.
    pub fn init(
        config: CoordinatorConfig,
        telephony: Arc<dyn TelephonyBackend>,
        audio: Arc<dyn AudioController>,
        provider: Arc<dyn CallProvider>,
    ) -> anyhow::Result<Arc<Self>> {
        if APP_STATE.get().is_some() {
            bail!("AppState already initialized");
        }
        init_logging(&config.log_filter);
        tracing::info!("Initializing call coordinator...");

        let runtime = tokio::runtime::Handle::try_current()
            .context("AppState must be initialized inside a Tokio runtime")?;

        let store = match &config.registration_file {
            Some(path) => RegistrationStore::new(path.clone()),
            None => RegistrationStore::open_default()
                .context("Failed to locate push registration file")?,
        };
        tracing::info!("Push registration stored at {:?}", store.path());

        let (coordinator, manager_rx) =
            CallCoordinator::new(config.clone(), telephony, audio);
        let coordinator = Arc::new(coordinator);

        let call_manager = Arc::new(CallManagerAdapter::new(
            Arc::clone(&coordinator),
            provider,
        ));
        runtime.spawn(Arc::clone(&call_manager).run(manager_rx));

        let push = Arc::new(PushInviteAdapter::new(
            Arc::clone(&coordinator),
            Some(store),
            config.registration_ttl_days,
        ));

        let state = Arc::new(Self {
            config,
            coordinator,
            call_manager,
            push,
        });

        APP_STATE
            .set(Arc::clone(&state))
            .map_err(|_| anyhow!("AppState already initialized"))?;

        Ok(state)
    }

    /// Gibt den globalen AppState zurück
    pub fn get() -> Option<Arc<Self>> {
        APP_STATE.get().cloned()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<CallCoordinator> {
        &self.coordinator
    }

    pub fn call_manager(&self) -> &Arc<CallManagerAdapter> {
        &self.call_manager
    }

    pub fn push(&self) -> &Arc<PushInviteAdapter> {
        &self.push
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::testing::{NullAudio, NullTelephony};
    use crate::call_engine::CallId;
    use crate::call_manager::{EndedReason, ProviderRequest, RequestCallback};
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingProvider {
        incoming: Mutex<Vec<CallId>>,
    }

    impl CallProvider for CountingProvider {
        fn report_new_incoming_call(
            &self,
            id: CallId,
            _caller: &str,
            _verified: bool,
            done: RequestCallback,
        ) {
            self.incoming.lock().push(id);
            done(Ok(()));
        }

        fn request_transaction(&self, _request: ProviderRequest, done: RequestCallback) {
            done(Ok(()));
        }

        fn report_outgoing_started(&self, _id: CallId, _at: DateTime<Utc>) {}

        fn report_outgoing_connected(&self, _id: CallId, _at: DateTime<Utc>) {}

        fn report_call_ended(&self, _id: CallId, _at: DateTime<Utc>, _reason: EndedReason) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_app_state_wires_push_to_call_manager() {
        let dir = std::env::temp_dir().join(format!("call-coordinator-{}", uuid::Uuid::new_v4()));
        let config = CoordinatorConfig {
            registration_file: Some(dir.join("registration.json")),
            ..CoordinatorConfig::default()
        };
        let provider = Arc::new(CountingProvider::default());

        let state = AppState::init(
            config.clone(),
            Arc::new(NullTelephony),
            Arc::new(NullAudio),
            provider.clone(),
        )
        .unwrap();
        assert!(AppState::get().is_some());
        assert!(AppState::init(
            config,
            Arc::new(NullTelephony),
            Arc::new(NullAudio),
            provider.clone(),
        )
        .is_err());

        let payload = br#"{"twi_message_type": "twilio.voice.call", "twi_call_sid": "CA7", "twi_from": "client:dora"}"#;
        state.push().handle_payload(payload).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(provider.incoming.lock().len(), 1);
        assert_eq!(state.coordinator().presentation().incoming_caller.as_deref(), Some("dora"));

        let _ = std::fs::remove_dir_all(dir);
    }
}
