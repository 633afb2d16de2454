//! Abschlüsse von OS-Aktionen
//!
//! Start und Annehmen bleiben offen, bis die Telefonie-Schicht den Anruf
//! bestätigt; der Registry hält sie so lange pro CallId.

use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Fulfilled,
    Failed,
}

/// Abschluss einer OS-Aktion.
///
/// Wird genau einmal ausgelöst. Ein Handle, das ohne `fulfill()`/`fail()`
/// verworfen wird (auch beim Unwinding), meldet `Failed`, damit das OS nie
/// auf eine Antwort wartet.
#[derive(Debug)]
pub struct ActionCompletion {
    tx: Option<oneshot::Sender<ActionOutcome>>,
}

impl ActionCompletion {
    pub fn new() -> (Self, oneshot::Receiver<ActionOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn fulfill(mut self) {
        self.complete(ActionOutcome::Fulfilled);
    }

    pub fn fail(mut self) {
        self.complete(ActionOutcome::Failed);
    }

    fn complete(&mut self, outcome: ActionOutcome) {
        if let Some(tx) = self.tx.take() {
            // Der Empfänger darf bereits weg sein
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for ActionCompletion {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!("Call manager action dropped without completion, failing it");
            self.complete(ActionOutcome::Failed);
        }
    }
}
