//! Adapter zum OS Call-Manager
//!
//! Übersetzt die Commands des Coordinators in das Vokabular des
//! Call-Managers und dessen Aktionen zurück in Coordinator-Events.

use super::action::ProviderAction;
use crate::call_engine::{
    ActionCompletion, CallCoordinator, CallId, CallManagerCommand, CoordinatorEvent,
    DisconnectReason, ManagerRequest,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Request rejected by call manager: {0}")]
    Rejected(String),

    #[error("Call manager unavailable")]
    Unavailable,
}

// ============================================================================
// PROVIDER SEAM
// ============================================================================

/// Grund eines Anruf-Endes aus Sicht des Call-Managers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndedReason {
    Failed,
    RemoteEnded,
    Unanswered,
    DeclinedElsewhere,
}

impl From<DisconnectReason> for EndedReason {
    fn from(reason: DisconnectReason) -> Self {
        match reason {
            DisconnectReason::Failed => EndedReason::Failed,
            DisconnectReason::UserInitiated | DisconnectReason::RemoteEnded => {
                EndedReason::RemoteEnded
            }
            DisconnectReason::InviteCancelled => EndedReason::Unanswered,
            DisconnectReason::InviteRejected => EndedReason::DeclinedElsewhere,
        }
    }
}

/// Transaktion, die beim Call-Manager angefragt wird
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderRequest {
    StartCall { id: CallId, handle: String },
    EndCall { id: CallId },
}

/// Wird aufgerufen, sobald der Call-Manager eine Anfrage beantwortet hat
pub type RequestCallback = Box<dyn FnOnce(Result<(), ProviderError>) + Send>;

/// OS Call-Manager des Hosts (System-Anruf-UI)
pub trait CallProvider: Send + Sync {
    fn report_new_incoming_call(
        &self,
        id: CallId,
        caller: &str,
        verified: bool,
        done: RequestCallback,
    );
    fn request_transaction(&self, request: ProviderRequest, done: RequestCallback);
    fn report_outgoing_started(&self, id: CallId, at: DateTime<Utc>);
    fn report_outgoing_connected(&self, id: CallId, at: DateTime<Utc>);
    fn report_call_ended(&self, id: CallId, at: DateTime<Utc>, reason: EndedReason);
}

// ============================================================================
// ADAPTER
// ============================================================================

pub struct CallManagerAdapter {
    coordinator: Arc<CallCoordinator>,
    provider: Arc<dyn CallProvider>,
}

impl CallManagerAdapter {
    pub fn new(coordinator: Arc<CallCoordinator>, provider: Arc<dyn CallProvider>) -> Self {
        Self {
            coordinator,
            provider,
        }
    }

    /// Führt eine OS-Aktion aus und schließt sie genau einmal ab.
    ///
    /// Start und Annehmen werden erst abgeschlossen, wenn der Anruf
    /// verbunden ist oder scheitert. Das Beenden wird immer bestätigt, auch
    /// für unbekannte Anrufe; das eigentliche Trennen läuft asynchron weiter.
    pub fn perform(&self, action: ProviderAction, completion: ActionCompletion) {
        let kind = action.kind();
        let id = action.id();
        tracing::debug!("Performing {:?} for call {}", kind, id);

        if let Err(e) = self.coordinator.perform(action.into_event(), completion) {
            tracing::error!("{:?} action for call {} failed: {}", kind, id, e);
        }
    }

    pub fn provider_did_reset(&self) {
        self.forward(CoordinatorEvent::ProviderReset);
    }

    pub fn audio_session_activated(&self) {
        self.forward(CoordinatorEvent::AudioSessionActivated);
    }

    pub fn audio_session_deactivated(&self) {
        self.forward(CoordinatorEvent::AudioSessionDeactivated);
    }

    /// Zeitüberschreitung einer Aktion: nur protokolliert, kein Retry
    pub fn timed_out(&self, action: &ProviderAction) {
        self.forward(CoordinatorEvent::ActionTimedOut {
            id: Some(action.id()),
            kind: action.kind(),
        });
    }

    /// Übersetzt einen Command des Coordinators für den Call-Manager
    pub fn execute(&self, command: CallManagerCommand) {
        match command {
            CallManagerCommand::ReportIncoming {
                id,
                caller,
                verified,
            } => {
                tracing::info!("Reporting incoming call {} from {}", id, caller);
                let done = self.completion_callback(id, ManagerRequest::ReportIncoming);
                self.provider
                    .report_new_incoming_call(id, &caller, verified, done);
            }
            CallManagerCommand::RequestStartCall { id, handle } => {
                let done = self.completion_callback(id, ManagerRequest::StartCall);
                self.provider
                    .request_transaction(ProviderRequest::StartCall { id, handle }, done);
            }
            CallManagerCommand::RequestEndCall { id } => {
                let done = self.completion_callback(id, ManagerRequest::EndCall);
                self.provider
                    .request_transaction(ProviderRequest::EndCall { id }, done);
            }
            CallManagerCommand::ReportOutgoingStarted { id } => {
                self.provider.report_outgoing_started(id, Utc::now());
            }
            CallManagerCommand::ReportOutgoingConnected { id } => {
                self.provider.report_outgoing_connected(id, Utc::now());
            }
            CallManagerCommand::ReportEnded { id, reason } => {
                tracing::info!("Reporting call {} ended ({:?})", id, reason);
                self.provider
                    .report_call_ended(id, Utc::now(), reason.into());
            }
        }
    }

    /// Verarbeitet die Commands des Coordinators, bis der Kanal geschlossen wird
    pub async fn run(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<CallManagerCommand>) {
        while let Some(command) = commands.recv().await {
            self.execute(command);
        }
        tracing::info!("Call manager command channel closed");
    }

    fn completion_callback(&self, id: CallId, request: ManagerRequest) -> RequestCallback {
        let coordinator = Arc::clone(&self.coordinator);
        Box::new(move |result| {
            let event = CoordinatorEvent::RequestCompleted {
                id,
                request,
                result: result.map_err(|e| e.to_string()),
            };
            if let Err(e) = coordinator.handle(event) {
                tracing::warn!("Failed to apply {:?} result for call {}: {}", request, id, e);
            }
        })
    }

    fn forward(&self, event: CoordinatorEvent) {
        if let Err(e) = self.coordinator.handle(event) {
            tracing::warn!("Call manager event rejected: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::testing;
    use crate::call_engine::{CallInvite, TelephonyEvent};
    use crate::call_manager::ActionOutcome;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot::error::TryRecvError;

    #[derive(Debug, Clone, PartialEq)]
    enum Reported {
        Incoming(CallId, String),
        Transaction(ProviderRequest),
        Started(CallId),
        Connected(CallId),
        Ended(CallId, EndedReason),
    }

    #[derive(Default)]
    struct FakeProvider {
        reject_requests: bool,
        reported: Mutex<Vec<Reported>>,
    }

    impl FakeProvider {
        fn answer(&self, done: RequestCallback) {
            if self.reject_requests {
                done(Err(ProviderError::Rejected("do not disturb".to_string())));
            } else {
                done(Ok(()));
            }
        }

        fn take(&self) -> Vec<Reported> {
            std::mem::take(&mut *self.reported.lock())
        }
    }

    impl CallProvider for FakeProvider {
        fn report_new_incoming_call(
            &self,
            id: CallId,
            caller: &str,
            _verified: bool,
            done: RequestCallback,
        ) {
            self.reported
                .lock()
                .push(Reported::Incoming(id, caller.to_string()));
            self.answer(done);
        }

        fn request_transaction(&self, request: ProviderRequest, done: RequestCallback) {
            self.reported.lock().push(Reported::Transaction(request));
            self.answer(done);
        }

        fn report_outgoing_started(&self, id: CallId, _at: DateTime<Utc>) {
            self.reported.lock().push(Reported::Started(id));
        }

        fn report_outgoing_connected(&self, id: CallId, _at: DateTime<Utc>) {
            self.reported.lock().push(Reported::Connected(id));
        }

        fn report_call_ended(&self, id: CallId, _at: DateTime<Utc>, reason: EndedReason) {
            self.reported.lock().push(Reported::Ended(id, reason));
        }
    }

    fn adapter(
        provider: FakeProvider,
    ) -> (
        CallManagerAdapter,
        Arc<FakeProvider>,
        mpsc::UnboundedReceiver<CallManagerCommand>,
    ) {
        let (coordinator, rx) = testing::coordinator();
        let provider = Arc::new(provider);
        let adapter = CallManagerAdapter::new(coordinator, provider.clone());
        (adapter, provider, rx)
    }

    fn telephony(adapter: &CallManagerAdapter, id: CallId, event: TelephonyEvent) {
        adapter
            .coordinator
            .handle(CoordinatorEvent::Telephony { id, event })
            .unwrap();
    }

    fn incoming(adapter: &CallManagerAdapter) -> CallId {
        let invite = CallInvite::new(
            "CA-1".to_string(),
            "client:alice".to_string(),
            "client:bob".to_string(),
            false,
        );
        let id = invite.id;
        adapter
            .coordinator
            .handle(CoordinatorEvent::InviteReceived(invite))
            .unwrap();
        id
    }

    fn drain(adapter: &CallManagerAdapter, rx: &mut mpsc::UnboundedReceiver<CallManagerCommand>) {
        while let Ok(command) = rx.try_recv() {
            adapter.execute(command);
        }
    }

    #[test]
    fn test_end_action_for_unknown_call_is_fulfilled() {
        let (adapter, _, _rx) = adapter(FakeProvider::default());
        let (completion, mut outcome) = ActionCompletion::new();
        adapter.perform(ProviderAction::EndCall { id: CallId::new() }, completion);
        assert_eq!(outcome.try_recv(), Ok(ActionOutcome::Fulfilled));
    }

    #[test]
    fn test_failed_action_is_failed() {
        let (adapter, _, _rx) = adapter(FakeProvider::default());
        let (completion, mut outcome) = ActionCompletion::new();
        adapter.perform(ProviderAction::AnswerCall { id: CallId::new() }, completion);
        assert_eq!(outcome.try_recv(), Ok(ActionOutcome::Failed));
    }

    #[test]
    fn test_outbound_call_round_trip() {
        let (adapter, provider, mut rx) = adapter(FakeProvider::default());
        let id = adapter.coordinator.dial("bob").unwrap();
        drain(&adapter, &mut rx);
        assert_eq!(
            provider.take(),
            vec![Reported::Transaction(ProviderRequest::StartCall {
                id,
                handle: "bob".to_string(),
            })]
        );

        let (completion, mut outcome) = ActionCompletion::new();
        adapter.perform(
            ProviderAction::StartCall {
                id,
                handle: "bob".to_string(),
            },
            completion,
        );
        // Erst mit der Verbindung abgeschlossen
        assert_eq!(outcome.try_recv(), Err(TryRecvError::Empty));
        drain(&adapter, &mut rx);
        assert_eq!(provider.take(), vec![Reported::Started(id)]);

        telephony(&adapter, id, TelephonyEvent::Connected);
        assert_eq!(outcome.try_recv(), Ok(ActionOutcome::Fulfilled));
        telephony(&adapter, id, TelephonyEvent::Disconnected { error: None });
        drain(&adapter, &mut rx);
        assert_eq!(
            provider.take(),
            vec![
                Reported::Connected(id),
                Reported::Ended(id, EndedReason::RemoteEnded),
            ]
        );
    }

    #[test]
    fn test_answer_action_completes_on_connect() {
        let (adapter, _, _rx) = adapter(FakeProvider::default());
        let id = incoming(&adapter);

        let (completion, mut outcome) = ActionCompletion::new();
        adapter.perform(ProviderAction::AnswerCall { id }, completion);
        assert_eq!(outcome.try_recv(), Err(TryRecvError::Empty));
        assert!(adapter.coordinator.with_registry(|r| r.has_pending_completion(&id)));

        telephony(&adapter, id, TelephonyEvent::Connected);
        assert_eq!(outcome.try_recv(), Ok(ActionOutcome::Fulfilled));
        assert!(!adapter.coordinator.with_registry(|r| r.has_pending_completion(&id)));
    }

    #[test]
    fn test_answer_action_fails_when_call_fails() {
        let (adapter, _, _rx) = adapter(FakeProvider::default());
        let id = incoming(&adapter);

        let (completion, mut outcome) = ActionCompletion::new();
        adapter.perform(ProviderAction::AnswerCall { id }, completion);
        assert_eq!(outcome.try_recv(), Err(TryRecvError::Empty));

        telephony(
            &adapter,
            id,
            TelephonyEvent::FailedToConnect {
                error: "ice failed".to_string(),
            },
        );
        assert_eq!(outcome.try_recv(), Ok(ActionOutcome::Failed));
    }

    #[test]
    fn test_start_action_fails_when_call_fails() {
        let (adapter, _, mut rx) = adapter(FakeProvider::default());
        let id = adapter.coordinator.dial("bob").unwrap();
        drain(&adapter, &mut rx);

        let (completion, mut outcome) = ActionCompletion::new();
        adapter.perform(
            ProviderAction::StartCall {
                id,
                handle: "bob".to_string(),
            },
            completion,
        );
        assert_eq!(outcome.try_recv(), Err(TryRecvError::Empty));

        telephony(
            &adapter,
            id,
            TelephonyEvent::FailedToConnect {
                error: "busy".to_string(),
            },
        );
        assert_eq!(outcome.try_recv(), Ok(ActionOutcome::Failed));
        assert!(adapter.coordinator.lookup_session(&id).is_none());
    }

    #[test]
    fn test_start_action_fails_on_disconnect_before_connect() {
        let (adapter, _, mut rx) = adapter(FakeProvider::default());
        let id = adapter.coordinator.dial("bob").unwrap();
        drain(&adapter, &mut rx);

        let (completion, mut outcome) = ActionCompletion::new();
        adapter.perform(
            ProviderAction::StartCall {
                id,
                handle: "bob".to_string(),
            },
            completion,
        );
        telephony(&adapter, id, TelephonyEvent::Disconnected { error: None });
        assert_eq!(outcome.try_recv(), Ok(ActionOutcome::Failed));
    }

    #[test]
    fn test_held_action_is_fulfilled_immediately() {
        let (adapter, _, mut rx) = adapter(FakeProvider::default());
        let id = adapter.coordinator.dial("bob").unwrap();
        drain(&adapter, &mut rx);

        let (completion, mut outcome) = ActionCompletion::new();
        adapter.perform(ProviderAction::SetHeld { id, on_hold: true }, completion);
        assert_eq!(outcome.try_recv(), Ok(ActionOutcome::Fulfilled));
    }

    #[test]
    fn test_cancelled_invite_end_action_is_quiet() {
        let (adapter, provider, mut rx) = adapter(FakeProvider::default());
        let id = incoming(&adapter);
        drain(&adapter, &mut rx);
        provider.take();
        let mut events = adapter.coordinator.subscribe();

        adapter
            .coordinator
            .handle(CoordinatorEvent::InviteCancelled {
                call_sid: "CA-1".to_string(),
            })
            .unwrap();
        drain(&adapter, &mut rx);
        assert_eq!(
            provider.take(),
            vec![Reported::Transaction(ProviderRequest::EndCall { id })]
        );

        let (completion, mut outcome) = ActionCompletion::new();
        adapter.perform(ProviderAction::EndCall { id }, completion);
        assert_eq!(outcome.try_recv(), Ok(ActionOutcome::Fulfilled));

        while let Ok(event) = events.try_recv() {
            assert!(
                !matches!(event, crate::call_engine::CallEvent::Error(_)),
                "unexpected {:?}",
                event
            );
        }
    }

    #[test]
    fn test_rejected_start_transaction_aborts_call() {
        let provider = FakeProvider {
            reject_requests: true,
            ..FakeProvider::default()
        };
        let (adapter, _, mut rx) = adapter(provider);
        let id = adapter.coordinator.dial("bob").unwrap();
        drain(&adapter, &mut rx);

        assert!(adapter.coordinator.lookup_session(&id).is_none());
    }

    #[test]
    fn test_rejected_incoming_report_rejects_invite() {
        let provider = FakeProvider {
            reject_requests: true,
            ..FakeProvider::default()
        };
        let (adapter, provider, mut rx) = adapter(provider);
        let id = incoming(&adapter);
        drain(&adapter, &mut rx);

        assert_eq!(provider.take(), vec![Reported::Incoming(id, "alice".to_string())]);
        assert!(adapter.coordinator.lookup_invite(&id).is_none());
    }

    #[test]
    fn test_ended_reason_mapping() {
        assert_eq!(EndedReason::from(DisconnectReason::Failed), EndedReason::Failed);
        assert_eq!(
            EndedReason::from(DisconnectReason::InviteCancelled),
            EndedReason::Unanswered
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_forwards_commands() {
        let (adapter, provider, rx) = adapter(FakeProvider::default());
        let adapter = Arc::new(adapter);
        tokio::spawn(Arc::clone(&adapter).run(rx));

        let id = adapter.coordinator.dial("carol").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            provider.take(),
            vec![Reported::Transaction(ProviderRequest::StartCall {
                id,
                handle: "carol".to_string(),
            })]
        );
    }
}
