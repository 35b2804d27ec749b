use alumnet_core::events::{EventTarget, ServerEvent};
use alumnet_core::rooms;
use std::collections::HashSet;

/// Per-connection state. Owned by the connection task, never shared.
pub struct Session {
    pub user_id: String,
    pub connection_id: String,
    channels: HashSet<String>,
}

impl Session {
    pub fn new(user_id: String, channels: impl IntoIterator<Item = String>) -> Self {
        Self {
            user_id,
            connection_id: uuid::Uuid::new_v4().to_string(),
            channels: channels.into_iter().collect(),
        }
    }

    pub fn should_receive_event(&self, event: &ServerEvent) -> bool {
        match &event.target {
            EventTarget::All => true,
            EventTarget::Channel(name) => self.channels.contains(name),
        }
    }

    pub fn join_room(&mut self, room: &str) -> bool {
        self.channels.insert(rooms::adhoc_channel(room))
    }

    pub fn leave_room(&mut self, room: &str) -> bool {
        self.channels.remove(&rooms::adhoc_channel(room))
    }

    /// Subscribed channels, sorted for stable output.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channels.iter().cloned().collect();
        channels.sort();
        channels
    }
}
