//! Shared application state.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use guildhall_core::Config;

use crate::backend::BackendClient;
use crate::notify::Notifier;
use crate::roles::RoleDirectory;
use crate::starboard::Starboard;
use crate::sync::SyncService;

/// Everything the gateway handlers and the webhook server share.
pub struct AppState {
    pub config: Config,
    pub backend: Arc<BackendClient>,
    pub roles: Arc<dyn RoleDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub sync: Arc<SyncService>,
    pub starboard: Arc<Starboard>,
    /// Set by the first `ready` event so gateway reconnects don't spawn a
    /// second scheduler or startup pass.
    pub(crate) services_started: AtomicBool,
}

impl AppState {
    pub fn new(
        config: Config,
        backend: Arc<BackendClient>,
        roles: Arc<dyn RoleDirectory>,
        notifier: Arc<dyn Notifier>,
        sync: Arc<SyncService>,
        starboard: Arc<Starboard>,
    ) -> Self {
        Self {
            config,
            backend,
            roles,
            notifier,
            sync,
            starboard,
            services_started: AtomicBool::new(false),
        }
    }
}
