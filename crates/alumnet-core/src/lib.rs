pub mod auth;
pub mod bridge;
pub mod directory;
pub mod error;
pub mod events;
pub mod presence;
pub mod presence_manager;
pub mod presence_store;
pub mod receipts;
pub mod relay;
pub mod rooms;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use directory::{GroupDirectory, MessageStore, UserDirectory};
use presence::PresenceService;
use presence_manager::PresenceManager;
use presence_store::PresenceStore;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    /// How long a user with no connections stays online before observers
    /// are told otherwise.
    pub offline_grace: Duration,
    /// Interval between WebSocket pings. Each tick also refreshes the
    /// connection's presence expiry.
    pub ping_interval: Duration,
    pub event_bus_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_expiry_seconds: 86_400,
            offline_grace: Duration::from_millis(5_000),
            ping_interval: Duration::from_secs(20),
            event_bus_capacity: 4096,
        }
    }
}

/// The collaborators the realtime layer delegates to.
#[derive(Clone)]
pub struct Directories {
    pub users: Arc<dyn UserDirectory>,
    pub groups: Arc<dyn GroupDirectory>,
    pub messages: Arc<dyn MessageStore>,
}

impl Directories {
    /// One implementation serving all three roles.
    pub fn shared<D>(directory: Arc<D>) -> Self
    where
        D: UserDirectory + GroupDirectory + MessageStore + 'static,
    {
        Self {
            users: directory.clone(),
            groups: directory.clone(),
            messages: directory,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub event_bus: events::EventBus,
    pub presence: Arc<PresenceService>,
    pub groups: Arc<dyn GroupDirectory>,
    pub messages: Arc<dyn MessageStore>,
    pub shutdown: Arc<Notify>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn PresenceStore>, directories: Directories) -> Self {
        let event_bus = events::EventBus::new(config.event_bus_capacity);
        let presence = Arc::new(PresenceService::new(
            store,
            PresenceManager::new(config.offline_grace),
            directories.users,
            event_bus.clone(),
        ));
        Self {
            config,
            event_bus,
            presence,
            groups: directories.groups,
            messages: directories.messages,
            shutdown: Arc::new(Notify::new()),
        }
    }
}
