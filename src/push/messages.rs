//! Message Types für Voice-Push-Notifications
//!
//! Die Feldnamen entsprechen den Schlüsseln, die der Voice-Dienst in die
//! Push-Payload schreibt. Unbekannte Schlüssel (z.B. `aps`) werden ignoriert.

use crate::call_engine::CallInvite;
use serde::{Deserialize, Serialize};

/// STIR/SHAKEN-Status eines vollständig verifizierten Anrufers
pub const VERIFIED_STIR_STATUS: &str = "TN-Validation-Passed-A";

// ============================================================================
// PUSH PAYLOADS
// ============================================================================

/// Alle bekannten Push-Nachrichten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "twi_message_type")]
pub enum PushPayload {
    /// Eingehender Anruf
    #[serde(rename = "twilio.voice.call")]
    Call(CallPayload),

    /// Anrufer hat vor dem Annehmen aufgelegt
    #[serde(rename = "twilio.voice.cancel")]
    Cancel(CancelPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPayload {
    #[serde(rename = "twi_call_sid")]
    pub call_sid: String,
    #[serde(rename = "twi_from")]
    pub from: String,
    #[serde(rename = "twi_to", default)]
    pub to: String,
    #[serde(rename = "twi_account_sid", default)]
    pub account_sid: Option<String>,
    #[serde(rename = "twi_stir_status", default)]
    pub stir_status: Option<String>,
    #[serde(rename = "twi_bridge_token", default)]
    pub bridge_token: Option<String>,
}

impl CallPayload {
    /// Anrufer mit höchster Attestierung verifiziert
    pub fn verified(&self) -> bool {
        self.stir_status.as_deref() == Some(VERIFIED_STIR_STATUS)
    }

    pub fn into_invite(self) -> CallInvite {
        let verified = self.verified();
        CallInvite::new(self.call_sid, self.from, self.to, verified)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelPayload {
    #[serde(rename = "twi_call_sid")]
    pub call_sid: String,
    #[serde(rename = "twi_from", default)]
    pub from: Option<String>,
    #[serde(rename = "twi_to", default)]
    pub to: Option<String>,
}
