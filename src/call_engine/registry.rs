//! Call Registry
//!
//! Hält die kanonische Menge aller Anrufe des Clients:
//! - Unbeantwortete Einladungen (Invites)
//! - Laufende Sessions (Connecting bis Disconnected)
//!
//! Eine CallId ist immer entweder Invite oder Session, nie beides.

use super::completion::ActionCompletion;
use super::warnings::QualityWarning;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Präfix, mit dem Client-Identitäten in Push-Adressen geliefert werden
const CLIENT_ADDRESS_PREFIX: &str = "client:";

// ============================================================================
// CALL ID
// ============================================================================

/// Eindeutige Kennung eines Anrufversuchs (wird nie wiederverwendet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(Uuid);

impl CallId {
    /// Erzeugt eine neue zufällige CallId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CallId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// CALL STATE
// ============================================================================

/// Richtung eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Grund für das Ende einer Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    UserInitiated,
    RemoteEnded,
    Failed,
    InviteRejected,
    InviteCancelled,
}

/// Lebenszyklus einer Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CallState {
    /// Verbindung wird aufgebaut (ausgehend gewählt oder eingehend angenommen)
    Connecting,
    /// Gegenseite klingelt (nur ausgehend)
    Ringing,
    /// Anruf aktiv
    Connected,
    /// Signalverlust, Verbindung wird wiederhergestellt
    Reconnecting,
    /// Anruf beendet (terminal)
    Disconnected(DisconnectReason),
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Disconnected(_))
    }

    /// Prüft, ob der Übergang `self -> next` für die gegebene Richtung erlaubt ist
    pub fn can_transition_to(&self, next: &CallState, direction: CallDirection) -> bool {
        use CallState::*;
        match (self, next) {
            (Disconnected(_), _) => false,
            (_, Disconnected(_)) => true,
            (Connecting, Ringing) => direction == CallDirection::Outbound,
            (Connecting | Ringing | Reconnecting, Connected) => true,
            (Connected, Reconnecting) => true,
            _ => false,
        }
    }
}

// ============================================================================
// CALL INVITE
// ============================================================================

/// Unbeantworteter eingehender Anruf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInvite {
    pub id: CallId,
    /// Referenz des Anrufs auf Signaling-Ebene (für Cancel-Zuordnung)
    pub call_sid: String,
    pub from: String,
    pub to: String,
    /// Anzeigename des Anrufers
    pub caller_name: String,
    /// Anrufer-Identität wurde vom Netz verifiziert
    pub verified: bool,
    pub received_at: DateTime<Utc>,
}

impl CallInvite {
    /// Erstellt einen neuen Invite mit frischer lokaler CallId
    pub fn new(call_sid: String, from: String, to: String, verified: bool) -> Self {
        let caller_name = from
            .strip_prefix(CLIENT_ADDRESS_PREFIX)
            .unwrap_or(&from)
            .to_string();

        Self {
            id: CallId::new(),
            call_sid,
            from,
            to,
            caller_name,
            verified,
            received_at: Utc::now(),
        }
    }
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Ausstehende Vollendung, die genau an eine Session gebunden ist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    /// Start-Transaktion beim OS angefragt, noch nicht bestätigt
    StartTransaction,
    /// Ausgehender Anruf gestartet, wartet auf "connected"
    Outgoing,
    /// Eingehender Anruf angenommen, wartet auf "connected"
    Answer,
}

/// Laufender Anruf
#[derive(Debug, Clone, PartialEq)]
pub struct CallSession {
    pub id: CallId,
    pub direction: CallDirection,
    pub state: CallState,
    pub on_hold: bool,
    pub muted: bool,
    /// Ziel (ausgehend) bzw. Absender (eingehend)
    pub remote: String,
    pub call_sid: Option<String>,
    pub pending: Option<PendingAction>,
    /// Einmal-Flag: das Ende wurde lokal angefordert
    pub user_initiated_end: bool,
    pub ringback_active: bool,
    pub warnings: BTreeSet<QualityWarning>,
    pub created_at: DateTime<Utc>,
    activation: u64,
}

impl CallSession {
    /// Neue ausgehende Session im Zustand `Connecting`
    pub fn outbound(id: CallId, destination: String) -> Self {
        Self::with(id, CallDirection::Outbound, destination, None)
    }

    /// Neue eingehende Session aus einem angenommenen Invite
    pub fn inbound(invite: &CallInvite) -> Self {
        let mut session = Self::with(
            invite.id,
            CallDirection::Inbound,
            invite.from.clone(),
            Some(invite.call_sid.clone()),
        );
        session.pending = Some(PendingAction::Answer);
        session
    }

    fn with(id: CallId, direction: CallDirection, remote: String, call_sid: Option<String>) -> Self {
        Self {
            id,
            direction,
            state: CallState::Connecting,
            on_hold: false,
            muted: false,
            remote,
            call_sid,
            pending: None,
            user_initiated_end: false,
            ringback_active: false,
            warnings: BTreeSet::new(),
            created_at: Utc::now(),
            activation: 0,
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Kanonische Menge von Invites und Sessions
///
/// Der Registry selbst ist nicht synchronisiert; der Coordinator hält ihn
/// hinter seinem Lock, wodurch jede Mutation atomar ist.
#[derive(Debug, Default)]
pub struct CallRegistry {
    invites: HashMap<CallId, CallInvite>,
    sessions: HashMap<CallId, CallSession>,
    /// Offene Start-/Annehmen-Aktionen, gebunden an ihre Session
    completions: HashMap<CallId, ActionCompletion>,
    activations: u64,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fügt einen Invite ein oder ersetzt ihn.
    ///
    /// Gibt `false` zurück, wenn die CallId bereits als Session existiert.
    pub fn upsert_invite(&mut self, invite: CallInvite) -> bool {
        if self.sessions.contains_key(&invite.id) {
            return false;
        }
        self.invites.insert(invite.id, invite);
        true
    }

    pub fn remove_invite(&mut self, id: &CallId) -> Option<CallInvite> {
        self.invites.remove(id)
    }

    pub fn lookup_invite(&self, id: &CallId) -> Option<&CallInvite> {
        self.invites.get(id)
    }

    /// Sucht einen Invite über die Signaling-Referenz
    pub fn find_invite_by_call_sid(&self, call_sid: &str) -> Option<&CallInvite> {
        self.invites.values().find(|invite| invite.call_sid == call_sid)
    }

    /// Der zuletzt eingegangene Invite
    pub fn latest_invite(&self) -> Option<&CallInvite> {
        self.invites.values().max_by_key(|invite| invite.received_at)
    }

    /// Fügt eine Session ein oder ersetzt sie.
    ///
    /// Ein Invite mit derselben CallId wird dabei verbraucht. Neue Sessions
    /// gelten als zuletzt aktiviert.
    pub fn upsert_session(&mut self, mut session: CallSession) {
        self.invites.remove(&session.id);
        if !self.sessions.contains_key(&session.id) {
            self.activations += 1;
            session.activation = self.activations;
        }
        self.sessions.insert(session.id, session);
    }

    /// Entfernt die Session. Eine noch offene Aktion wird dabei verworfen
    /// und meldet damit `Failed`.
    pub fn remove_session(&mut self, id: &CallId) -> Option<CallSession> {
        self.completions.remove(id);
        self.sessions.remove(id)
    }

    pub fn lookup_session(&self, id: &CallId) -> Option<&CallSession> {
        self.sessions.get(id)
    }

    pub(crate) fn session_mut(&mut self, id: &CallId) -> Option<&mut CallSession> {
        self.sessions.get_mut(id)
    }

    /// Markiert eine Session als zuletzt aktiviert (connected / un-hold)
    pub fn activate(&mut self, id: &CallId) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                self.activations += 1;
                session.activation = self.activations;
                true
            }
            None => false,
        }
    }

    /// Der Anruf, der dem Benutzer als "aktueller Anruf" angezeigt wird.
    ///
    /// Die zuletzt aktivierte, nicht gehaltene Session; sonst die einzige
    /// verbleibende Session, falls sie gehalten wird; sonst keiner.
    pub fn active_session(&self) -> Option<&CallSession> {
        let live = || self.sessions.values().filter(|s| !s.state.is_terminal());

        if let Some(session) = live().filter(|s| !s.on_hold).max_by_key(|s| s.activation) {
            return Some(session);
        }

        let mut remaining = live();
        match (remaining.next(), remaining.next()) {
            (Some(only), None) if only.on_hold => Some(only),
            _ => None,
        }
    }

    /// Momentaufnahme aller Sessions
    pub fn all_sessions(&self) -> std::vec::IntoIter<CallSession> {
        self.sessions.values().cloned().collect::<Vec<_>>().into_iter()
    }

    pub fn invites(&self) -> impl Iterator<Item = &CallInvite> {
        self.invites.values()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn invite_count(&self) -> usize {
        self.invites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.invites.is_empty()
    }

    /// Hält den Abschluss einer OS-Aktion bis zur Bestätigung der Telefonie.
    ///
    /// Ohne Session zu `id` wird der Abschluss zurückgegeben.
    pub(crate) fn attach_completion(
        &mut self,
        id: CallId,
        completion: ActionCompletion,
    ) -> Result<(), ActionCompletion> {
        if !self.sessions.contains_key(&id) {
            return Err(completion);
        }
        if let Some(previous) = self.completions.insert(id, completion) {
            tracing::warn!("Call {} had an unfinished action, failing it", id);
            previous.fail();
        }
        Ok(())
    }

    pub(crate) fn take_completion(&mut self, id: &CallId) -> Option<ActionCompletion> {
        self.completions.remove(id)
    }

    pub fn has_pending_completion(&self, id: &CallId) -> bool {
        self.completions.contains_key(id)
    }

    pub(crate) fn drain_invites(&mut self) -> Vec<CallInvite> {
        self.invites.drain().map(|(_, invite)| invite).collect()
    }

    pub(crate) fn session_ids(&self) -> Vec<CallId> {
        self.sessions.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite(sid: &str) -> CallInvite {
        CallInvite::new(
            sid.to_string(),
            "client:alice".to_string(),
            "client:bob".to_string(),
            false,
        )
    }

    #[test]
    fn test_invite_strips_client_prefix() {
        let invite = invite("CA1");
        assert_eq!(invite.caller_name, "alice");

        let plain = CallInvite::new(
            "CA2".to_string(),
            "+15551234".to_string(),
            "client:bob".to_string(),
            true,
        );
        assert_eq!(plain.caller_name, "+15551234");
    }

    #[test]
    fn test_remove_absent_returns_none() {
        let mut registry = CallRegistry::new();
        let id = CallId::new();
        assert!(registry.remove_invite(&id).is_none());
        assert!(registry.remove_session(&id).is_none());
        assert!(registry.lookup_session(&id).is_none());
    }

    #[test]
    fn test_session_consumes_invite() {
        let mut registry = CallRegistry::new();
        let invite = invite("CA1");
        let id = invite.id;
        assert!(registry.upsert_invite(invite.clone()));

        registry.upsert_session(CallSession::inbound(&invite));
        assert!(registry.lookup_invite(&id).is_none());
        assert!(registry.lookup_session(&id).is_some());

        // Invite darf nicht neben der Session existieren
        assert!(!registry.upsert_invite(invite));
        assert_eq!(registry.invite_count(), 0);
    }

    #[test]
    fn test_find_invite_by_call_sid() {
        let mut registry = CallRegistry::new();
        let a = invite("CA-a");
        let b = invite("CA-b");
        let b_id = b.id;
        registry.upsert_invite(a);
        registry.upsert_invite(b);

        assert_eq!(registry.find_invite_by_call_sid("CA-b").map(|i| i.id), Some(b_id));
        assert!(registry.find_invite_by_call_sid("CA-c").is_none());
    }

    #[test]
    fn test_active_session_prefers_latest_unheld() {
        let mut registry = CallRegistry::new();
        let a = CallId::new();
        let b = CallId::new();
        registry.upsert_session(CallSession::outbound(a, "alice".to_string()));
        registry.upsert_session(CallSession::outbound(b, "bob".to_string()));
        assert_eq!(registry.active_session().map(|s| s.id), Some(b));

        registry.activate(&a);
        assert_eq!(registry.active_session().map(|s| s.id), Some(a));

        registry.session_mut(&a).unwrap().on_hold = true;
        assert_eq!(registry.active_session().map(|s| s.id), Some(b));
    }

    #[test]
    fn test_single_held_session_is_active() {
        let mut registry = CallRegistry::new();
        let a = CallId::new();
        let mut session = CallSession::outbound(a, "alice".to_string());
        session.on_hold = true;
        registry.upsert_session(session);
        assert_eq!(registry.active_session().map(|s| s.id), Some(a));

        // Zwei gehaltene Sessions: keine ist aktiv
        let b = CallId::new();
        let mut other = CallSession::outbound(b, "bob".to_string());
        other.on_hold = true;
        registry.upsert_session(other);
        assert!(registry.active_session().is_none());
    }

    #[test]
    fn test_active_session_never_terminal() {
        let mut registry = CallRegistry::new();
        let a = CallId::new();
        let mut session = CallSession::outbound(a, "alice".to_string());
        session.state = CallState::Disconnected(DisconnectReason::Failed);
        registry.upsert_session(session);
        assert!(registry.active_session().is_none());
    }

    #[test]
    fn test_all_sessions_is_snapshot() {
        let mut registry = CallRegistry::new();
        let a = CallId::new();
        registry.upsert_session(CallSession::outbound(a, "alice".to_string()));

        let snapshot = registry.all_sessions();
        registry.remove_session(&a);
        assert_eq!(snapshot.count(), 1);
        assert_eq!(registry.all_sessions().count(), 0);
    }

    #[test]
    fn test_completion_bound_to_session() {
        use crate::call_engine::ActionOutcome;

        let mut registry = CallRegistry::new();
        let a = CallId::new();

        let (completion, mut outcome) = ActionCompletion::new();
        let completion = registry.attach_completion(a, completion).unwrap_err();
        drop(completion);
        assert_eq!(outcome.try_recv(), Ok(ActionOutcome::Failed));

        registry.upsert_session(CallSession::outbound(a, "alice".to_string()));
        let (completion, mut outcome) = ActionCompletion::new();
        registry.attach_completion(a, completion).unwrap();
        assert!(registry.has_pending_completion(&a));
        assert!(outcome.try_recv().is_err());

        // Entfernen der Session schließt die Aktion als fehlgeschlagen ab
        registry.remove_session(&a);
        assert!(!registry.has_pending_completion(&a));
        assert_eq!(outcome.try_recv(), Ok(ActionOutcome::Failed));
    }

    #[test]
    fn test_transition_rules() {
        use CallState::*;
        let out = CallDirection::Outbound;
        let inb = CallDirection::Inbound;

        assert!(Connecting.can_transition_to(&Ringing, out));
        assert!(!Connecting.can_transition_to(&Ringing, inb));
        assert!(Ringing.can_transition_to(&Connected, out));
        assert!(Connected.can_transition_to(&Reconnecting, inb));
        assert!(Reconnecting.can_transition_to(&Connected, inb));
        assert!(!Connecting.can_transition_to(&Reconnecting, out));
        assert!(!Ringing.can_transition_to(&Ringing, out));
        assert!(Ringing.can_transition_to(&Disconnected(DisconnectReason::Failed), out));
        assert!(!Disconnected(DisconnectReason::Failed).can_transition_to(&Connected, out));
    }
}
