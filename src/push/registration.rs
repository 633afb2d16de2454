//! Push-Registrierung
//!
//! Merkt sich das zuletzt registrierte Device-Token und den Zeitpunkt der
//! Bindung. Die Registrierung selbst übernimmt der Host.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistrationStoreError {
    #[error("Failed to access registration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid registration file: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Could not determine app data directory")]
    NoDataDirectory,
}

/// Zuletzt gebundene Registrierung
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationState {
    #[serde(with = "token_base64", default)]
    pub device_token: Option<Vec<u8>>,
    #[serde(default)]
    pub last_bound_at: Option<DateTime<Utc>>,
}

impl RegistrationState {
    /// Neu registrieren, wenn sich das Token geändert hat oder die letzte
    /// Bindung älter als die halbe Gültigkeit ist.
    pub fn registration_required(&self, token: &[u8], now: DateTime<Utc>, ttl_days: i64) -> bool {
        match (&self.device_token, self.last_bound_at) {
            (Some(cached), Some(bound_at)) if cached.as_slice() == token => {
                now >= bound_at + Duration::days(ttl_days / 2)
            }
            _ => true,
        }
    }

    pub fn record_binding(&mut self, token: &[u8], now: DateTime<Utc>) {
        self.device_token = Some(token.to_vec());
        self.last_bound_at = Some(now);
    }

    pub fn clear(&mut self) {
        self.device_token = None;
        self.last_bound_at = None;
    }
}

/// JSON-Datei mit dem `RegistrationState`
#[derive(Debug, Clone)]
pub struct RegistrationStore {
    path: PathBuf,
}

impl RegistrationStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Speicherort im App-Datenverzeichnis:
    /// - Windows: `%APPDATA%/kaufm/call-coordinator/data/push/registration.json`
    /// - macOS: `~/Library/Application Support/com.kaufm.call-coordinator/push/registration.json`
    /// - Linux: `~/.local/share/call-coordinator/push/registration.json`
    pub fn open_default() -> Result<Self, RegistrationStoreError> {
        let proj_dirs = directories::ProjectDirs::from("com", "kaufm", "call-coordinator")
            .ok_or(RegistrationStoreError::NoDataDirectory)?;

        let mut path = proj_dirs.data_dir().to_path_buf();
        path.push("push");
        path.push("registration.json");
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fehlt die Datei, gibt es noch keine Registrierung
    pub fn load(&self) -> Result<RegistrationState, RegistrationStoreError> {
        if !self.path.exists() {
            return Ok(RegistrationState::default());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, state: &RegistrationState) -> Result<(), RegistrationStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(state)?)?;

        // Das Token gehört nur dem Benutzer
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }
}

mod token_base64 {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(token: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match token {
            Some(bytes) => s.serialize_some(&BASE64.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|encoded| BASE64.decode(encoded.trim()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bound(token: &[u8]) -> (RegistrationState, DateTime<Utc>) {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut state = RegistrationState::default();
        state.record_binding(token, at);
        (state, at)
    }

    fn temp_store() -> RegistrationStore {
        let path = std::env::temp_dir()
            .join(format!("call-coordinator-{}", uuid::Uuid::new_v4()))
            .join("registration.json");
        RegistrationStore::new(path)
    }

    #[test]
    fn test_fresh_state_requires_registration() {
        let state = RegistrationState::default();
        assert!(state.registration_required(b"token", Utc::now(), 365));
    }

    #[test]
    fn test_stale_after_half_ttl() {
        let (state, at) = bound(b"token");
        assert!(!state.registration_required(b"token", at + Duration::days(181), 365));
        assert!(state.registration_required(b"token", at + Duration::days(182), 365));
    }

    #[test]
    fn test_changed_token_requires_registration() {
        let (state, at) = bound(b"token");
        assert!(state.registration_required(b"other", at, 365));
    }

    #[test]
    fn test_store_round_trip() {
        let store = temp_store();
        assert_eq!(store.load().unwrap(), RegistrationState::default());

        let (state, _) = bound(&[0xde, 0xad, 0xbe, 0xef]);
        store.save(&state).unwrap();
        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("3q2+7w=="));
        assert_eq!(store.load().unwrap(), state);

        fs::remove_dir_all(store.path().parent().unwrap()).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let store = temp_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "not json").unwrap();
        assert!(matches!(store.load(), Err(RegistrationStoreError::Format(_))));

        fs::remove_dir_all(store.path().parent().unwrap()).unwrap();
    }
}
