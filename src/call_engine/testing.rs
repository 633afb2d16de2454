//! Test-Helfer: Coordinator mit stummen Kollaborateuren

use super::{
    AudioController, AudioError, AudioRoute, CallCoordinator, CallId, CallInvite,
    CallManagerCommand, TelephonyBackend, TelephonyError,
};
use crate::config::CoordinatorConfig;
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) struct NullTelephony;

impl TelephonyBackend for NullTelephony {
    fn connect(&self, _id: CallId, _destination: &str) -> Result<(), TelephonyError> {
        Ok(())
    }

    fn accept(&self, _invite: &CallInvite) -> Result<(), TelephonyError> {
        Ok(())
    }

    fn reject(&self, _invite: &CallInvite) -> Result<(), TelephonyError> {
        Ok(())
    }

    fn disconnect(&self, _id: CallId) -> Result<(), TelephonyError> {
        Ok(())
    }

    fn set_on_hold(&self, _id: CallId, _on_hold: bool) -> Result<(), TelephonyError> {
        Ok(())
    }

    fn set_muted(&self, _id: CallId, _muted: bool) -> Result<(), TelephonyError> {
        Ok(())
    }
}

pub(crate) struct NullAudio;

impl AudioController for NullAudio {
    fn set_device_enabled(&self, _enabled: bool) {}

    fn select_route(&self, _route: &AudioRoute) -> Result<(), AudioError> {
        Ok(())
    }

    fn start_ringback(&self) {}

    fn stop_ringback(&self) {}
}

pub(crate) fn coordinator() -> (
    Arc<CallCoordinator>,
    mpsc::UnboundedReceiver<CallManagerCommand>,
) {
    let (coordinator, rx) = CallCoordinator::new(
        CoordinatorConfig::default(),
        Arc::new(NullTelephony),
        Arc::new(NullAudio),
    );
    (Arc::new(coordinator), rx)
}
