//! Aktionen des OS Call-Managers

use crate::call_engine::{ActionKind, CallId, CoordinatorEvent};

/// Vom OS Call-Manager ausgeführte Aktion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderAction {
    StartCall { id: CallId, handle: String },
    AnswerCall { id: CallId },
    EndCall { id: CallId },
    SetHeld { id: CallId, on_hold: bool },
    SetMuted { id: CallId, muted: bool },
}

impl ProviderAction {
    pub fn id(&self) -> CallId {
        match self {
            ProviderAction::StartCall { id, .. }
            | ProviderAction::AnswerCall { id }
            | ProviderAction::EndCall { id }
            | ProviderAction::SetHeld { id, .. }
            | ProviderAction::SetMuted { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            ProviderAction::StartCall { .. } => ActionKind::StartCall,
            ProviderAction::AnswerCall { .. } => ActionKind::AnswerCall,
            ProviderAction::EndCall { .. } => ActionKind::EndCall,
            ProviderAction::SetHeld { .. } => ActionKind::SetHeld,
            ProviderAction::SetMuted { .. } => ActionKind::SetMuted,
        }
    }

    pub(crate) fn into_event(self) -> CoordinatorEvent {
        match self {
            ProviderAction::StartCall { id, handle } => CoordinatorEvent::StartCallPerformed {
                id,
                destination: handle,
            },
            ProviderAction::AnswerCall { id } => CoordinatorEvent::AnswerCallPerformed { id },
            ProviderAction::EndCall { id } => CoordinatorEvent::EndCallPerformed { id },
            ProviderAction::SetHeld { id, on_hold } => {
                CoordinatorEvent::SetHeldPerformed { id, on_hold }
            }
            ProviderAction::SetMuted { id, muted } => {
                CoordinatorEvent::SetMutedPerformed { id, muted }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_maps_to_event() {
        let id = CallId::new();
        let action = ProviderAction::SetHeld { id, on_hold: true };
        assert_eq!(action.id(), id);
        assert_eq!(action.kind(), ActionKind::SetHeld);
        assert_eq!(
            action.into_event(),
            CoordinatorEvent::SetHeldPerformed { id, on_hold: true }
        );
    }
}
