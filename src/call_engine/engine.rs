//! Call Lifecycle Coordinator
//!
//! Führt die Ereignisse aus drei unabhängigen Quellen zusammen:
//! - Push-Kanal (eingehende Einladungen, Abbrüche)
//! - Telefonie-SDK (ringing, connected, reconnecting, disconnected, ...)
//! - OS Call-Manager (Aktionen des Benutzers in der System-UI, Audio-Session)
//!
//! Jedes Ereignis läuft über `handle()` und wird unter einem Lock auf den
//! Registry angewendet. Die daraus entstehenden Commands werden erst nach
//! dem Freigeben des Locks ausgeführt.

use super::audio::{AudioError, AudioRoute, AudioRoutePolicy, RouteSelection};
use super::completion::{ActionCompletion, ActionOutcome};
use super::events::{
    AudioCommand, CallEvent, CallManagerCommand, CoordinatorEvent, ManagerRequest,
    RecordPermission, TelephonyCommand, TelephonyEvent,
};
use super::registry::{
    CallDirection, CallId, CallInvite, CallRegistry, CallSession, CallState, DisconnectReason,
    PendingAction,
};
use super::warnings::WarningDiff;
use crate::config::CoordinatorConfig;
use crate::presentation::{PresentationFlags, PresentationState};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    #[error("Unknown call: {0}")]
    UnknownCall(CallId),

    #[error("No pending invite for call {0}")]
    UnknownInvite(CallId),

    #[error("No pending invite with call reference {0}")]
    UnknownCallSid(String),

    #[error("No active call")]
    NoActiveCall,

    #[error("Already in a call")]
    AlreadyInCall,

    #[error("Invalid destination")]
    InvalidDestination,

    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Duplicate invite for call reference {0}")]
    DuplicateInvite(String),

    #[error("Invalid transition for call {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: CallId,
        from: CallState,
        to: CallState,
    },

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelephonyError {
    #[error("Telephony operation failed: {0}")]
    OperationFailed(String),

    #[error("Telephony layer does not know call {0}")]
    UnknownCall(CallId),
}

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Telefonie-SDK. Alle Methoden kehren sofort zurück; Ergebnisse kommen
/// später als `TelephonyEvent` zurück.
pub trait TelephonyBackend: Send + Sync {
    /// Startet einen ausgehenden Anruf, gebunden an `id`
    fn connect(&self, id: CallId, destination: &str) -> Result<(), TelephonyError>;
    fn accept(&self, invite: &CallInvite) -> Result<(), TelephonyError>;
    fn reject(&self, invite: &CallInvite) -> Result<(), TelephonyError>;
    fn disconnect(&self, id: CallId) -> Result<(), TelephonyError>;
    fn set_on_hold(&self, id: CallId, on_hold: bool) -> Result<(), TelephonyError>;
    fn set_muted(&self, id: CallId, muted: bool) -> Result<(), TelephonyError>;
}

/// Audio-Subsystem des Hosts
pub trait AudioController: Send + Sync {
    fn set_device_enabled(&self, enabled: bool);
    fn select_route(&self, route: &AudioRoute) -> Result<(), AudioError>;
    fn start_ringback(&self);
    fn stop_ringback(&self);
}

// ============================================================================
// STATE
// ============================================================================

struct CoordinatorState {
    registry: CallRegistry,
    routes: AudioRoutePolicy,
    flags: PresentationFlags,
    record_permission: RecordPermission,
    /// Vom Anrufer abgebrochene Invites, deren End-Aktion noch aussteht
    cancelled_invites: HashSet<CallId>,
}

impl CoordinatorState {
    fn project(&self) -> PresentationState {
        PresentationState::project(&self.registry, &self.routes, &self.flags)
    }
}

enum Effect {
    Telephony(TelephonyCommand),
    Audio(AudioCommand),
    Manager(CallManagerCommand),
    Notify(CallEvent),
    Complete(ActionCompletion, ActionOutcome),
    ClearWarning(u64),
}

/// Unter dem Lock gesammelte Auswirkungen eines Ereignisses
#[derive(Default)]
struct Effects {
    items: Vec<Effect>,
    presentation_changed: bool,
}

impl Effects {
    fn telephony(&mut self, command: TelephonyCommand) {
        self.items.push(Effect::Telephony(command));
    }

    fn audio(&mut self, command: AudioCommand) {
        self.items.push(Effect::Audio(command));
    }

    fn manager(&mut self, command: CallManagerCommand) {
        self.items.push(Effect::Manager(command));
    }

    fn notify(&mut self, event: CallEvent) {
        self.items.push(Effect::Notify(event));
    }

    fn complete(&mut self, completion: ActionCompletion, outcome: ActionOutcome) {
        self.items.push(Effect::Complete(completion, outcome));
    }

    fn touch(&mut self) {
        self.presentation_changed = true;
    }
}

// ============================================================================
// CALL COORDINATOR
// ============================================================================

/// Zustandsmaschine aller Anrufe des Clients
pub struct CallCoordinator {
    config: CoordinatorConfig,
    state: Arc<Mutex<CoordinatorState>>,
    telephony: Arc<dyn TelephonyBackend>,
    audio: Arc<dyn AudioController>,
    manager_tx: mpsc::UnboundedSender<CallManagerCommand>,
    event_tx: broadcast::Sender<CallEvent>,
}

impl CallCoordinator {
    /// Erstellt einen neuen Coordinator.
    ///
    /// Der zurückgegebene Receiver liefert die Commands für den OS
    /// Call-Manager und gehört dem `CallManagerAdapter`.
    pub fn new(
        config: CoordinatorConfig,
        telephony: Arc<dyn TelephonyBackend>,
        audio: Arc<dyn AudioController>,
    ) -> (Self, mpsc::UnboundedReceiver<CallManagerCommand>) {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (manager_tx, manager_rx) = mpsc::unbounded_channel();

        let state = CoordinatorState {
            registry: CallRegistry::new(),
            routes: AudioRoutePolicy::new(config.default_route.clone()),
            flags: PresentationFlags::default(),
            record_permission: RecordPermission::default(),
            cancelled_invites: HashSet::new(),
        };

        let coordinator = Self {
            config,
            state: Arc::new(Mutex::new(state)),
            telephony,
            audio,
            manager_tx,
            event_tx,
        };
        (coordinator, manager_rx)
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Aktueller Zustand für die Oberfläche
    pub fn presentation(&self) -> PresentationState {
        self.state.lock().project()
    }

    pub fn active_session(&self) -> Option<CallSession> {
        self.state.lock().registry.active_session().cloned()
    }

    pub fn lookup_session(&self, id: &CallId) -> Option<CallSession> {
        self.state.lock().registry.lookup_session(id).cloned()
    }

    pub fn lookup_invite(&self, id: &CallId) -> Option<CallInvite> {
        self.state.lock().registry.lookup_invite(id).cloned()
    }

    /// Liest den Registry unter dem Lock (konsistente Momentaufnahme)
    pub fn with_registry<R>(&self, read: impl FnOnce(&CallRegistry) -> R) -> R {
        read(&self.state.lock().registry)
    }

    /// Einziger Eingang für alle Ereignisse
    pub fn handle(&self, event: CoordinatorEvent) -> Result<(), CoordinatorError> {
        self.run(|this, state, fx| this.apply(state, event, fx))
    }

    /// Wendet eine Aktion des OS Call-Managers an und schließt sie ab.
    ///
    /// Start und Annehmen bleiben offen, bis die Telefonie-Schicht den Anruf
    /// verbindet oder er scheitert. Ein Ende wird immer erfüllt, auch für
    /// unbekannte Anrufe. Alle anderen Aktionen schlagen fehl, wenn das
    /// Ereignis abgelehnt wird.
    pub fn perform(
        &self,
        event: CoordinatorEvent,
        completion: ActionCompletion,
    ) -> Result<(), CoordinatorError> {
        let deferred = match &event {
            CoordinatorEvent::StartCallPerformed { id, .. }
            | CoordinatorEvent::AnswerCallPerformed { id } => Some(*id),
            _ => None,
        };
        let always_fulfilled = matches!(event, CoordinatorEvent::EndCallPerformed { .. });

        self.run(move |this, state, fx| match (this.apply(state, event, fx), deferred) {
            (Ok(()), Some(id)) => {
                // Unter demselben Lock, damit ein sofortiger Fehlschlag sie findet
                if let Err(completion) = state.registry.attach_completion(id, completion) {
                    fx.complete(completion, ActionOutcome::Failed);
                }
                Ok(())
            }
            (Ok(()), None) => {
                fx.complete(completion, ActionOutcome::Fulfilled);
                Ok(())
            }
            (Err(e), _) if always_fulfilled => {
                fx.complete(completion, ActionOutcome::Fulfilled);
                Err(e)
            }
            (Err(e), _) => {
                fx.complete(completion, ActionOutcome::Failed);
                Err(e)
            }
        })
    }

    /// Wählt `destination` und gibt die neue CallId zurück
    pub fn dial(&self, destination: &str) -> Result<CallId, CoordinatorError> {
        self.run(|this, state, fx| this.dial_inner(state, destination, true, fx))
    }

    pub fn answer(&self, id: CallId) -> Result<(), CoordinatorError> {
        self.handle(CoordinatorEvent::AnswerRequested { id })
    }

    pub fn hang_up(&self) -> Result<(), CoordinatorError> {
        self.handle(CoordinatorEvent::HangUpRequested)
    }

    fn run<R>(
        &self,
        step: impl FnOnce(&Self, &mut CoordinatorState, &mut Effects) -> Result<R, CoordinatorError>,
    ) -> Result<R, CoordinatorError> {
        let mut effects = Effects::default();
        let (result, presentation) = {
            let mut state = self.state.lock();
            let result = step(self, &mut state, &mut effects);
            let presentation = effects.presentation_changed.then(|| state.project());
            (result, presentation)
        };

        self.dispatch(effects.items);
        if let Err(e) = &result {
            tracing::warn!("Call event rejected: {}", e);
            let _ = self.event_tx.send(CallEvent::Error(e.to_string()));
        }
        if let Some(presentation) = presentation {
            let _ = self
                .event_tx
                .send(CallEvent::PresentationChanged(presentation));
        }
        result
    }

    fn apply(
        &self,
        state: &mut CoordinatorState,
        event: CoordinatorEvent,
        fx: &mut Effects,
    ) -> Result<(), CoordinatorError> {
        match event {
            CoordinatorEvent::DialRequested { destination } => {
                self.dial_inner(state, &destination, true, fx).map(|_| ())
            }
            CoordinatorEvent::AnswerRequested { id } | CoordinatorEvent::AnswerCallPerformed { id } => {
                self.answer_invite(state, id, fx)
            }
            CoordinatorEvent::HangUpRequested => self.hang_up_active(state, fx),
            CoordinatorEvent::SetMuteRequested { muted } => {
                let id = state
                    .registry
                    .active_session()
                    .map(|s| s.id)
                    .ok_or(CoordinatorError::NoActiveCall)?;
                self.set_muted(state, id, muted, fx)
            }
            CoordinatorEvent::RouteToggleRequested => {
                match state.routes.toggle() {
                    RouteSelection::Selected(route) => {
                        fx.audio(AudioCommand::SelectRoute(route));
                        fx.touch();
                    }
                    RouteSelection::ChooseFrom(routes) => {
                        fx.notify(CallEvent::RouteChoiceRequired(routes));
                    }
                }
                Ok(())
            }
            CoordinatorEvent::RouteRequested(route) => {
                let route = state.routes.choose(route)?;
                fx.audio(AudioCommand::SelectRoute(route));
                fx.touch();
                Ok(())
            }
            CoordinatorEvent::RecordPermissionChanged(permission) => {
                state.record_permission = permission;
                if permission == RecordPermission::Granted {
                    state.flags.permission_alert = false;
                }
                fx.touch();
                Ok(())
            }
            CoordinatorEvent::PermissionAlertDismissed { dial_anyway } => {
                state.flags.permission_alert = false;
                fx.touch();
                match dial_anyway {
                    Some(destination) => self.dial_inner(state, &destination, false, fx).map(|_| ()),
                    None => Ok(()),
                }
            }
            CoordinatorEvent::InviteReceived(invite) => self.invite_received(state, invite, fx),
            CoordinatorEvent::InviteCancelled { call_sid } => {
                self.invite_cancelled(state, &call_sid, fx)
            }
            CoordinatorEvent::Telephony { id, event } => self.telephony_event(state, id, event, fx),
            CoordinatorEvent::StartCallPerformed { id, destination } => {
                self.start_call_performed(state, id, destination, fx)
            }
            CoordinatorEvent::EndCallPerformed { id } => self.end_call_performed(state, id, fx),
            CoordinatorEvent::SetHeldPerformed { id, on_hold } => {
                self.set_held(state, id, on_hold, fx)
            }
            CoordinatorEvent::SetMutedPerformed { id, muted } => {
                self.set_muted(state, id, muted, fx)
            }
            CoordinatorEvent::ProviderReset => {
                self.provider_reset(state, fx);
                Ok(())
            }
            CoordinatorEvent::AudioSessionActivated => {
                fx.audio(AudioCommand::SetDeviceEnabled(true));
                Ok(())
            }
            CoordinatorEvent::AudioSessionDeactivated => {
                fx.audio(AudioCommand::SetDeviceEnabled(false));
                Ok(())
            }
            CoordinatorEvent::ActionTimedOut { id, kind } => {
                tracing::warn!("Call manager action {:?} timed out (call {:?})", kind, id);
                if let Some(completion) = id.and_then(|id| state.registry.take_completion(&id)) {
                    fx.complete(completion, ActionOutcome::Failed);
                }
                Ok(())
            }
            CoordinatorEvent::RequestCompleted {
                id,
                request,
                result,
            } => {
                self.request_completed(state, id, request, result, fx);
                Ok(())
            }
            CoordinatorEvent::SystemRouteChanged { route, available } => {
                let call_active = state.registry.active_session().is_some();
                tracing::debug!("System audio route changed to {}", route);
                state
                    .routes
                    .on_automatic_route_change(route, available, call_active);
                fx.touch();
                Ok(())
            }
        }
    }

    // ========================================================================
    // USER ACTIONS
    // ========================================================================

    fn dial_inner(
        &self,
        state: &mut CoordinatorState,
        destination: &str,
        check_permission: bool,
        fx: &mut Effects,
    ) -> Result<CallId, CoordinatorError> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(CoordinatorError::InvalidDestination);
        }
        if state.registry.active_session().is_some() {
            return Err(CoordinatorError::AlreadyInCall);
        }
        if check_permission && state.record_permission == RecordPermission::Denied {
            state.flags.permission_alert = true;
            fx.touch();
            return Err(CoordinatorError::PermissionDenied);
        }

        let id = CallId::new();
        let mut session = CallSession::outbound(id, destination.to_string());
        session.pending = Some(PendingAction::StartTransaction);
        state.registry.upsert_session(session);

        tracing::info!("Dialing {} (call {})", destination, id);
        fx.manager(CallManagerCommand::RequestStartCall {
            id,
            handle: destination.to_string(),
        });
        fx.notify(CallEvent::StateChanged {
            id,
            state: CallState::Connecting,
        });
        fx.touch();
        Ok(id)
    }

    fn answer_invite(
        &self,
        state: &mut CoordinatorState,
        id: CallId,
        fx: &mut Effects,
    ) -> Result<(), CoordinatorError> {
        let invite = state
            .registry
            .remove_invite(&id)
            .ok_or(CoordinatorError::UnknownInvite(id))?;

        tracing::info!("Answering call {} from {}", id, invite.caller_name);
        state.registry.upsert_session(CallSession::inbound(&invite));
        fx.telephony(TelephonyCommand::Accept(invite));
        fx.notify(CallEvent::StateChanged {
            id,
            state: CallState::Connecting,
        });
        fx.touch();
        Ok(())
    }

    /// Das Ende wird erst mit der Bestätigung der Telefonie-Schicht wirksam
    fn hang_up_active(
        &self,
        state: &mut CoordinatorState,
        fx: &mut Effects,
    ) -> Result<(), CoordinatorError> {
        let id = state
            .registry
            .active_session()
            .map(|s| s.id)
            .ok_or(CoordinatorError::NoActiveCall)?;

        if let Some(session) = state.registry.session_mut(&id) {
            session.user_initiated_end = true;
        }
        tracing::info!("Hanging up call {}", id);
        fx.manager(CallManagerCommand::RequestEndCall { id });
        Ok(())
    }

    fn set_muted(
        &self,
        state: &mut CoordinatorState,
        id: CallId,
        muted: bool,
        fx: &mut Effects,
    ) -> Result<(), CoordinatorError> {
        let session = state
            .registry
            .session_mut(&id)
            .ok_or(CoordinatorError::UnknownCall(id))?;
        session.muted = muted;
        fx.telephony(TelephonyCommand::SetMuted { id, muted });
        fx.touch();
        Ok(())
    }

    fn set_held(
        &self,
        state: &mut CoordinatorState,
        id: CallId,
        on_hold: bool,
        fx: &mut Effects,
    ) -> Result<(), CoordinatorError> {
        let session = state
            .registry
            .session_mut(&id)
            .ok_or(CoordinatorError::UnknownCall(id))?;
        session.on_hold = on_hold;
        fx.telephony(TelephonyCommand::SetOnHold { id, on_hold });

        if !on_hold {
            // Audio nach dem Fortsetzen wieder einschalten
            fx.audio(AudioCommand::SetDeviceEnabled(true));
            state.registry.activate(&id);
        }
        tracing::info!("Call {} on hold: {}", id, on_hold);
        fx.touch();
        Ok(())
    }

    // ========================================================================
    // PUSH
    // ========================================================================

    fn invite_received(
        &self,
        state: &mut CoordinatorState,
        invite: CallInvite,
        fx: &mut Effects,
    ) -> Result<(), CoordinatorError> {
        if state
            .registry
            .find_invite_by_call_sid(&invite.call_sid)
            .is_some()
        {
            return Err(CoordinatorError::DuplicateInvite(invite.call_sid));
        }

        let id = invite.id;
        let caller = invite.caller_name.clone();
        let verified = invite.verified;
        if !state.registry.upsert_invite(invite.clone()) {
            return Err(CoordinatorError::DuplicateInvite(invite.call_sid));
        }

        tracing::info!("Incoming call {} from {}", id, caller);
        fx.manager(CallManagerCommand::ReportIncoming {
            id,
            caller: caller.clone(),
            verified,
        });
        fx.notify(CallEvent::InviteReceived { id, caller });
        fx.touch();
        Ok(())
    }

    fn invite_cancelled(
        &self,
        state: &mut CoordinatorState,
        call_sid: &str,
        fx: &mut Effects,
    ) -> Result<(), CoordinatorError> {
        let id = state
            .registry
            .find_invite_by_call_sid(call_sid)
            .map(|invite| invite.id)
            .ok_or_else(|| CoordinatorError::UnknownCallSid(call_sid.to_string()))?;

        state.registry.remove_invite(&id);
        state.cancelled_invites.insert(id);
        tracing::info!("Call {} cancelled by caller", id);
        fx.manager(CallManagerCommand::RequestEndCall { id });
        fx.notify(CallEvent::InviteRemoved {
            id,
            reason: DisconnectReason::InviteCancelled,
        });
        fx.touch();
        Ok(())
    }

    // ========================================================================
    // TELEPHONY
    // ========================================================================

    fn telephony_event(
        &self,
        state: &mut CoordinatorState,
        id: CallId,
        event: TelephonyEvent,
        fx: &mut Effects,
    ) -> Result<(), CoordinatorError> {
        match event {
            TelephonyEvent::Ringing => {
                let session = transition(&mut state.registry, id, CallState::Ringing)?;
                if self.config.ringback_fallback && !session.ringback_active {
                    session.ringback_active = true;
                    fx.audio(AudioCommand::StartRingback);
                }
                fx.notify(CallEvent::StateChanged {
                    id,
                    state: CallState::Ringing,
                });
            }

            TelephonyEvent::Reconnected => {
                let session = state
                    .registry
                    .session_mut(&id)
                    .ok_or(CoordinatorError::UnknownCall(id))?;
                if session.state != CallState::Reconnecting {
                    return Err(CoordinatorError::InvalidTransition {
                        id,
                        from: session.state,
                        to: CallState::Connected,
                    });
                }
                session.state = CallState::Connected;
                tracing::info!("Call {} reconnected", id);
                fx.notify(CallEvent::StateChanged {
                    id,
                    state: CallState::Connected,
                });
            }

            TelephonyEvent::Connected => {
                let session = transition(&mut state.registry, id, CallState::Connected)?;
                if session.ringback_active {
                    session.ringback_active = false;
                    fx.audio(AudioCommand::StopRingback);
                }
                match session.pending.take() {
                    Some(PendingAction::Outgoing) => {
                        fx.manager(CallManagerCommand::ReportOutgoingConnected { id });
                    }
                    Some(PendingAction::Answer) => {
                        tracing::info!("Answered call {} is connected", id);
                    }
                    Some(PendingAction::StartTransaction) => {
                        tracing::warn!("Call {} connected before the OS accepted its start", id);
                    }
                    None => {}
                }
                if let Some(completion) = state.registry.take_completion(&id) {
                    fx.complete(completion, ActionOutcome::Fulfilled);
                }

                state.registry.activate(&id);
                fx.audio(AudioCommand::SelectRoute(state.routes.connect_route()));
                fx.notify(CallEvent::StateChanged {
                    id,
                    state: CallState::Connected,
                });
            }

            TelephonyEvent::Reconnecting { error } => {
                transition(&mut state.registry, id, CallState::Reconnecting)?;
                tracing::warn!("Call {} reconnecting: {}", id, error);
                fx.notify(CallEvent::StateChanged {
                    id,
                    state: CallState::Reconnecting,
                });
            }

            TelephonyEvent::FailedToConnect { error } => {
                let session = state
                    .registry
                    .session_mut(&id)
                    .ok_or(CoordinatorError::UnknownCall(id))?;
                let pending = session.pending.take();
                if let Some(pending) = pending {
                    tracing::warn!("Pending {:?} for call {} failed", pending, id);
                }
                tracing::error!("Call {} failed to connect: {}", id, error);
                // Einen Anruf, den das OS nie gestartet hat, nicht als beendet melden
                if pending != Some(PendingAction::StartTransaction) {
                    fx.manager(CallManagerCommand::ReportEnded {
                        id,
                        reason: DisconnectReason::Failed,
                    });
                }
                self.terminate(state, id, DisconnectReason::Failed, fx);
            }

            TelephonyEvent::Disconnected { error } => {
                let session = state
                    .registry
                    .session_mut(&id)
                    .ok_or(CoordinatorError::UnknownCall(id))?;
                let reason = if session.user_initiated_end {
                    DisconnectReason::UserInitiated
                } else if error.is_some() {
                    DisconnectReason::Failed
                } else {
                    DisconnectReason::RemoteEnded
                };
                let pending = session.pending.take();
                if let Some(pending) = pending {
                    tracing::warn!("Pending {:?} for call {} dropped by disconnect", pending, id);
                }
                if let Some(error) = &error {
                    tracing::error!("Call {} disconnected with error: {}", id, error);
                }

                if reason != DisconnectReason::UserInitiated
                    && pending != Some(PendingAction::StartTransaction)
                {
                    fx.manager(CallManagerCommand::ReportEnded { id, reason });
                }
                self.terminate(state, id, reason, fx);
            }

            TelephonyEvent::QualityWarnings { current, previous } => {
                let session = state
                    .registry
                    .session_mut(&id)
                    .ok_or(CoordinatorError::UnknownCall(id))?;
                let diff = WarningDiff::between(&current, &previous);
                session.warnings = current;

                if let Some(message) = diff.message() {
                    tracing::info!("Call {}: {}", id, message);
                    let generation = state.flags.show_warning(message);
                    fx.items.push(Effect::ClearWarning(generation));
                }
            }
        }

        fx.touch();
        Ok(())
    }

    /// Entfernt eine Session endgültig aus dem Registry
    fn terminate(
        &self,
        state: &mut CoordinatorState,
        id: CallId,
        reason: DisconnectReason,
        fx: &mut Effects,
    ) {
        if let Some(completion) = state.registry.take_completion(&id) {
            fx.complete(completion, ActionOutcome::Failed);
        }
        let Some(mut session) = state.registry.remove_session(&id) else {
            return;
        };
        session.state = CallState::Disconnected(reason);
        if session.ringback_active {
            fx.audio(AudioCommand::StopRingback);
        }

        tracing::info!("Call {} ended ({:?})", id, reason);
        fx.notify(CallEvent::StateChanged {
            id,
            state: session.state,
        });
        fx.notify(CallEvent::SessionEnded { id, reason });
        fx.touch();
    }

    // ========================================================================
    // OS CALL MANAGER
    // ========================================================================

    fn start_call_performed(
        &self,
        state: &mut CoordinatorState,
        id: CallId,
        destination: String,
        fx: &mut Effects,
    ) -> Result<(), CoordinatorError> {
        match state.registry.session_mut(&id) {
            Some(session) => {
                if session.state != CallState::Connecting
                    || session.direction != CallDirection::Outbound
                {
                    return Err(CoordinatorError::InvalidTransition {
                        id,
                        from: session.state,
                        to: CallState::Connecting,
                    });
                }
                session.pending = Some(PendingAction::Outgoing);
            }
            None => {
                // Vom System gestarteter Anruf (z.B. aus der Anrufliste)
                tracing::info!("OS started call {} to {}", id, destination);
                let mut session = CallSession::outbound(id, destination.clone());
                session.pending = Some(PendingAction::Outgoing);
                state.registry.upsert_session(session);
                fx.notify(CallEvent::StateChanged {
                    id,
                    state: CallState::Connecting,
                });
            }
        }

        fx.manager(CallManagerCommand::ReportOutgoingStarted { id });
        fx.telephony(TelephonyCommand::Connect { id, destination });
        fx.touch();
        Ok(())
    }

    fn end_call_performed(
        &self,
        state: &mut CoordinatorState,
        id: CallId,
        fx: &mut Effects,
    ) -> Result<(), CoordinatorError> {
        if let Some(invite) = state.registry.remove_invite(&id) {
            tracing::info!("Rejecting call {}", id);
            fx.telephony(TelephonyCommand::Reject(invite));
            fx.notify(CallEvent::InviteRemoved {
                id,
                reason: DisconnectReason::InviteRejected,
            });
            fx.touch();
            return Ok(());
        }

        if let Some(session) = state.registry.session_mut(&id) {
            // Das OS hat das Ende selbst angestoßen und braucht keinen Bericht
            session.user_initiated_end = true;
            fx.telephony(TelephonyCommand::Disconnect { id });
            return Ok(());
        }

        if state.cancelled_invites.remove(&id) {
            tracing::debug!("End action for cancelled call {}", id);
            return Ok(());
        }

        Err(CoordinatorError::UnknownCall(id))
    }

    fn request_completed(
        &self,
        state: &mut CoordinatorState,
        id: CallId,
        request: ManagerRequest,
        result: Result<(), String>,
        fx: &mut Effects,
    ) {
        let error = match result {
            Ok(()) => {
                tracing::info!("{:?} request for call {} succeeded", request, id);
                return;
            }
            Err(error) => error,
        };
        tracing::error!("{:?} request for call {} failed: {}", request, id, error);

        match request {
            ManagerRequest::ReportIncoming => {
                if let Some(invite) = state.registry.remove_invite(&id) {
                    fx.telephony(TelephonyCommand::Reject(invite));
                    fx.notify(CallEvent::InviteRemoved {
                        id,
                        reason: DisconnectReason::InviteRejected,
                    });
                    fx.touch();
                }
            }
            ManagerRequest::StartCall => {
                let awaiting_start = state
                    .registry
                    .lookup_session(&id)
                    .is_some_and(|s| s.pending == Some(PendingAction::StartTransaction));
                if awaiting_start {
                    self.terminate(state, id, DisconnectReason::Failed, fx);
                }
            }
            ManagerRequest::EndCall => {
                // Für einen abgebrochenen Invite kommt keine End-Aktion mehr
                state.cancelled_invites.remove(&id);
                if let Some(session) = state.registry.session_mut(&id) {
                    session.user_initiated_end = false;
                }
            }
        }
    }

    fn provider_reset(&self, state: &mut CoordinatorState, fx: &mut Effects) {
        tracing::warn!("Call manager provider reset, dropping all calls");
        fx.audio(AudioCommand::SetDeviceEnabled(false));
        state.cancelled_invites.clear();

        for invite in state.registry.drain_invites() {
            fx.notify(CallEvent::InviteRemoved {
                id: invite.id,
                reason: DisconnectReason::InviteRejected,
            });
            fx.telephony(TelephonyCommand::Reject(invite));
        }
        for id in state.registry.session_ids() {
            if let Some(session) = state.registry.session_mut(&id) {
                session.user_initiated_end = true;
            }
            fx.telephony(TelephonyCommand::Disconnect { id });
        }
        fx.touch();
    }

    // ========================================================================
    // DISPATCH
    // ========================================================================

    fn dispatch(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Telephony(command) => self.execute_telephony(command),
                Effect::Audio(command) => self.execute_audio(command),
                Effect::Manager(command) => {
                    if self.manager_tx.send(command).is_err() {
                        tracing::error!("Call manager adapter is gone, command dropped");
                    }
                }
                Effect::Notify(event) => {
                    let _ = self.event_tx.send(event);
                }
                Effect::Complete(completion, ActionOutcome::Fulfilled) => completion.fulfill(),
                Effect::Complete(completion, ActionOutcome::Failed) => completion.fail(),
                Effect::ClearWarning(generation) => self.schedule_warning_clear(generation),
            }
        }
    }

    fn execute_telephony(&self, command: TelephonyCommand) {
        match command {
            TelephonyCommand::Connect { id, destination } => {
                if let Err(e) = self.telephony.connect(id, &destination) {
                    self.feed_back(id, TelephonyEvent::FailedToConnect { error: e.to_string() });
                }
            }
            TelephonyCommand::Accept(invite) => {
                if let Err(e) = self.telephony.accept(&invite) {
                    self.feed_back(
                        invite.id,
                        TelephonyEvent::FailedToConnect { error: e.to_string() },
                    );
                }
            }
            TelephonyCommand::Reject(invite) => {
                if let Err(e) = self.telephony.reject(&invite) {
                    tracing::warn!("Failed to reject call {}: {}", invite.id, e);
                }
            }
            TelephonyCommand::Disconnect { id } => {
                if let Err(e) = self.telephony.disconnect(id) {
                    // Ohne Anruf im SDK kommt nie ein "disconnected"
                    self.feed_back(
                        id,
                        TelephonyEvent::Disconnected {
                            error: Some(e.to_string()),
                        },
                    );
                }
            }
            TelephonyCommand::SetOnHold { id, on_hold } => {
                if let Err(e) = self.telephony.set_on_hold(id, on_hold) {
                    tracing::warn!("Failed to set hold on call {}: {}", id, e);
                }
            }
            TelephonyCommand::SetMuted { id, muted } => {
                if let Err(e) = self.telephony.set_muted(id, muted) {
                    tracing::warn!("Failed to set mute on call {}: {}", id, e);
                }
            }
        }
    }

    fn execute_audio(&self, command: AudioCommand) {
        match command {
            AudioCommand::SetDeviceEnabled(enabled) => self.audio.set_device_enabled(enabled),
            AudioCommand::SelectRoute(route) => {
                if let Err(e) = self.audio.select_route(&route) {
                    tracing::warn!("Failed to select audio route {}: {}", route, e);
                }
            }
            AudioCommand::StartRingback => self.audio.start_ringback(),
            AudioCommand::StopRingback => self.audio.stop_ringback(),
        }
    }

    fn feed_back(&self, id: CallId, event: TelephonyEvent) {
        if let Err(e) = self.handle(CoordinatorEvent::Telephony { id, event }) {
            tracing::warn!("Failed to apply telephony result for call {}: {}", id, e);
        }
    }

    /// Blendet die Warnung nach `warning_display` aus, sofern keine neuere kam
    fn schedule_warning_clear(&self, generation: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime, warning stays until superseded");
            return;
        };

        let state = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();
        let delay = self.config.warning_display;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let presentation = {
                let mut state = state.lock();
                if !state.flags.clear_warning(generation) {
                    return;
                }
                state.project()
            };
            let _ = event_tx.send(CallEvent::PresentationChanged(presentation));
        });
    }
}

impl std::fmt::Debug for CallCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CallCoordinator")
            .field("sessions", &state.registry.session_count())
            .field("invites", &state.registry.invite_count())
            .field("route", state.routes.current())
            .finish()
    }
}

/// Führt einen Zustandsübergang aus, sofern er erlaubt ist
fn transition(
    registry: &mut CallRegistry,
    id: CallId,
    next: CallState,
) -> Result<&mut CallSession, CoordinatorError> {
    let session = registry
        .session_mut(&id)
        .ok_or(CoordinatorError::UnknownCall(id))?;
    if !session.state.can_transition_to(&next, session.direction) {
        return Err(CoordinatorError::InvalidTransition {
            id,
            from: session.state,
            to: next,
        });
    }
    tracing::debug!("Call {}: {:?} -> {:?}", id, session.state, next);
    session.state = next;
    Ok(session)
}
