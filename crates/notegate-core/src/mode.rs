//! Picks the authentication mode once per load
//!
//! Order matters: a local device record always wins, and an offline device is
//! never told that no account exists just because it could not check.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::provider::{Connectivity, DeviceStore, IdentityProvider, ProfileFragment, RemoteGateInfo};

/// Which flow to present
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    /// No account yet: create one
    Setup,
    /// This device was set up before: enter the local PIN
    Unlock,
    /// An account exists elsewhere: admit this device
    LinkDevice,
    /// No local record and no network: nothing can be done yet
    OfflineNoSetup,
}

/// Outcome of mode resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeResolution {
    pub mode: AuthMode,
    /// Greeting fragment, from the local record or the remote account
    pub profile: Option<ProfileFragment>,
    /// Present only for [`AuthMode::LinkDevice`]
    pub gate: Option<RemoteGateInfo>,
}

impl ModeResolution {
    fn bare(mode: AuthMode) -> Self {
        Self {
            mode,
            profile: None,
            gate: None,
        }
    }
}

/// Resolves the [`AuthMode`] from local and remote state
pub struct ModeResolver {
    devices: Arc<dyn DeviceStore>,
    connectivity: Arc<dyn Connectivity>,
    identity: Arc<dyn IdentityProvider>,
}

impl ModeResolver {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        connectivity: Arc<dyn Connectivity>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            devices,
            connectivity,
            identity,
        }
    }

    /// Run the decision table
    pub async fn resolve(&self) -> ModeResolution {
        if self.devices.has_device_record() {
            debug!("Local device record found");
            return ModeResolution {
                mode: AuthMode::Unlock,
                profile: self.devices.cached_profile(),
                gate: None,
            };
        }

        if !self.connectivity.is_online() {
            info!("Offline without a device record");
            return ModeResolution::bare(AuthMode::OfflineNoSetup);
        }

        match self.identity.fetch_remote_gate_info().await {
            Ok(Some(gate)) => {
                info!(email = %gate.display_email(), "Existing account found, linking device");
                ModeResolution {
                    mode: AuthMode::LinkDevice,
                    profile: Some(gate.profile.clone()),
                    gate: Some(gate),
                }
            }
            Ok(None) => {
                debug!("No remote account");
                ModeResolution::bare(AuthMode::Setup)
            }
            Err(e) => {
                warn!("Remote account lookup failed, treating as no account: {}", e);
                ModeResolution::bare(AuthMode::Setup)
            }
        }
    }
}
