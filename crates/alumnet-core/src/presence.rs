use alumnet_models::gateway::EVENT_USER_STATUS_UPDATE;
use alumnet_models::presence::UserStatus;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::directory::UserDirectory;
use crate::events::EventBus;
use crate::presence_manager::PresenceManager;
use crate::presence_store::PresenceStore;

/// Online/offline bookkeeping for all connections of this instance.
///
/// Combines the connection store, the offline debouncer and the persisted
/// user directory, and announces transitions on the event bus. Transitions
/// for one identity hold that identity's lock from the store update to the
/// broadcast, so observers see them in the order they were applied. A
/// deferred offline transition claims its debouncer slot only once it holds
/// the lock, so a connect that gets the lock first still counts as a resume.
pub struct PresenceService {
    store: Arc<dyn PresenceStore>,
    manager: PresenceManager,
    users: Arc<dyn UserDirectory>,
    bus: EventBus,
    locks: DashMap<String, Arc<Mutex<()>>>,
    live: AtomicUsize,
    idle: Notify,
}

impl PresenceService {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        manager: PresenceManager,
        users: Arc<dyn UserDirectory>,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            manager,
            users,
            bus,
            locks: DashMap::new(),
            live: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    fn lock_for(&self, identity: &str) -> Arc<Mutex<()>> {
        self.locks.entry(identity.to_string()).or_default().clone()
    }

    /// Forget the identity's lock once nobody else holds a reference to it.
    fn release_lock(&self, identity: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(identity, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Register a new live connection. Returns the identity's connection
    /// count afterwards.
    ///
    /// Observers are told the identity came online only on a fresh 0 to 1
    /// transition. Resuming inside the grace period of a previous disconnect
    /// is silent.
    pub async fn connect(&self, identity: &str, handle: &str) -> usize {
        self.live.fetch_add(1, Ordering::AcqRel);
        let lock = self.lock_for(identity);
        let count = {
            let _guard = lock.lock().await;
            let resumed = self.manager.cancel_offline(identity);
            let count = self.store.add_connection(identity, handle).await;
            tracing::debug!(user_id = %identity, handle, count, resumed, "connection registered");

            if count == 1 && !resumed {
                if let Err(e) = self.users.set_online(identity, true).await {
                    tracing::warn!(user_id = %identity, "failed to persist online state: {e}");
                }
                self.bus.broadcast_all(
                    EVENT_USER_STATUS_UPDATE,
                    UserStatus::online(identity, Utc::now()),
                );
            }
            count
        };
        self.release_lock(identity, lock);
        count
    }

    /// Drop a connection. When it was the identity's last one, the offline
    /// transition is deferred by the grace period.
    pub async fn disconnect(self: &Arc<Self>, identity: &str, handle: &str) -> usize {
        let lock = self.lock_for(identity);
        let remaining = {
            let _guard = lock.lock().await;
            let remaining = self.store.remove_connection(identity, handle).await;
            tracing::debug!(user_id = %identity, handle, remaining, "connection removed");
            if remaining == 0 {
                let service = Arc::clone(self);
                let owned = identity.to_string();
                self.manager.schedule_offline(identity, move |generation| async move {
                    service.go_offline(&owned, generation).await;
                });
            }
            remaining
        };
        self.release_lock(identity, lock);
        self.connection_closed();
        remaining
    }

    /// Drop a connection and, if it was the identity's last one, run the
    /// offline transition right away. Used when the server is going down and
    /// a deferred timer would never fire.
    pub async fn disconnect_now(&self, identity: &str, handle: &str) -> usize {
        let lock = self.lock_for(identity);
        let remaining = {
            let _guard = lock.lock().await;
            let remaining = self.store.remove_connection(identity, handle).await;
            tracing::debug!(user_id = %identity, handle, remaining, "connection removed at shutdown");
            if remaining == 0 {
                self.manager.cancel_offline(identity);
                self.apply_offline(identity).await;
            }
            remaining
        };
        self.release_lock(identity, lock);
        self.connection_closed();
        remaining
    }

    async fn go_offline(&self, identity: &str, generation: u64) {
        let lock = self.lock_for(identity);
        {
            let _guard = lock.lock().await;
            if self.manager.claim(identity, generation) {
                self.apply_offline(identity).await;
            }
        }
        self.release_lock(identity, lock);
    }

    /// Caller holds the identity's lock.
    async fn apply_offline(&self, identity: &str) {
        let count = self.store.count_for(identity).await;
        if count > 0 {
            tracing::debug!(user_id = %identity, count, "identity reconnected elsewhere, staying online");
            return;
        }

        let now = Utc::now();
        if let Err(e) = self.users.set_online(identity, false).await {
            tracing::warn!(user_id = %identity, "failed to persist offline state: {e}");
        }
        if let Err(e) = self.users.set_last_seen(identity, now).await {
            tracing::warn!(user_id = %identity, "failed to persist last seen: {e}");
        }
        tracing::info!(user_id = %identity, "user went offline");
        self.bus.broadcast_all(
            EVENT_USER_STATUS_UPDATE,
            UserStatus::offline(identity, Some(now)),
        );
    }

    fn connection_closed(&self) {
        if self.live.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Resolves once every connection registered with [`connect`] has been
    /// disconnected.
    ///
    /// [`connect`]: Self::connect
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.live.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Current status of `identity` as answered to `check_user_status`.
    pub async fn status(&self, identity: &str) -> UserStatus {
        if self.store.count_for(identity).await > 0 {
            return UserStatus {
                user_id: identity.to_string(),
                is_online: true,
                last_seen: None,
            };
        }
        let last_seen = match self.users.last_seen(identity).await {
            Ok(last_seen) => last_seen,
            Err(e) => {
                tracing::warn!(user_id = %identity, "last seen lookup failed: {e}");
                None
            }
        };
        UserStatus::offline(identity, last_seen)
    }

    pub async fn refresh(&self, identity: &str, handle: &str) {
        self.store.refresh(identity, handle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::events::ServerEvent;
    use crate::presence_store::MemoryPresenceStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct Users {
        online: Mutex<Vec<(String, bool)>>,
        last_seen: Mutex<Option<DateTime<Utc>>>,
        /// Simulated latency of the last-seen write.
        write_delay: Duration,
    }

    #[async_trait]
    impl UserDirectory for Users {
        async fn last_seen(&self, _identity: &str) -> Result<Option<DateTime<Utc>>, CoreError> {
            Ok(*self.last_seen.lock().unwrap())
        }

        async fn set_online(&self, identity: &str, online: bool) -> Result<(), CoreError> {
            self.online.lock().unwrap().push((identity.to_string(), online));
            Ok(())
        }

        async fn set_last_seen(&self, _identity: &str, at: DateTime<Utc>) -> Result<(), CoreError> {
            if !self.write_delay.is_zero() {
                tokio::time::sleep(self.write_delay).await;
            }
            *self.last_seen.lock().unwrap() = Some(at);
            Ok(())
        }
    }

    type Harness = (Arc<PresenceService>, Arc<Users>, broadcast::Receiver<Arc<ServerEvent>>);

    fn service(grace_ms: u64) -> Harness {
        service_with(grace_ms, Users::default())
    }

    fn service_with(grace_ms: u64, users: Users) -> Harness {
        let bus = EventBus::new(64);
        let rx = bus.subscribe();
        let users = Arc::new(users);
        let service = Arc::new(PresenceService::new(
            Arc::new(MemoryPresenceStore::new()),
            PresenceManager::new(Duration::from_millis(grace_ms)),
            users.clone(),
            bus,
        ));
        (service, users, rx)
    }

    fn statuses(rx: &mut broadcast::Receiver<Arc<ServerEvent>>) -> Vec<UserStatus> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.event_type, EVENT_USER_STATUS_UPDATE);
            out.push(serde_json::from_value(event.payload.clone()).unwrap());
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn first_connection_announces_online() {
        let (presence, users, mut rx) = service(5_000);
        assert_eq!(presence.connect("u1", "h1").await, 1);

        let events = statuses(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_online);
        assert!(events[0].last_seen.is_some());
        assert_eq!(*users.online.lock().unwrap(), vec![("u1".to_string(), true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_device_stays_quiet_and_keeps_user_online() {
        let (presence, _users, mut rx) = service(5_000);
        presence.connect("u1", "phone").await;
        assert_eq!(presence.connect("u1", "laptop").await, 2);
        assert_eq!(presence.disconnect("u1", "phone").await, 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(statuses(&mut rx).len(), 1);
        assert!(presence.status("u1").await.is_online);
    }

    #[tokio::test(start_paused = true)]
    async fn last_connection_goes_offline_after_grace() {
        let (presence, users, mut rx) = service(5_000);
        presence.connect("u1", "h1").await;
        statuses(&mut rx);

        presence.disconnect("u1", "h1").await;
        tokio::time::sleep(Duration::from_millis(4_000)).await;
        assert!(statuses(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        let events = statuses(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_online);
        assert!(events[0].last_seen.is_some());
        assert!(users.last_seen.lock().unwrap().is_some());
        assert_eq!(
            users.online.lock().unwrap().last(),
            Some(&("u1".to_string(), false))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_grace_is_invisible() {
        let (presence, users, mut rx) = service(5_000);
        presence.connect("u1", "h1").await;
        statuses(&mut rx);

        presence.disconnect("u1", "h1").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        presence.connect("u1", "h2").await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(statuses(&mut rx).is_empty());
        assert_eq!(users.online.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn both_sockets_closing_yields_one_offline_event() {
        let (presence, _users, mut rx) = service(5_000);
        presence.connect("u1", "s1").await;
        presence.connect("u1", "s2").await;
        presence.disconnect("u1", "s1").await;
        presence.disconnect("u1", "s2").await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        let events = statuses(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events[0].is_online);
        assert!(!events[1].is_online);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_offline_announces_again() {
        let (presence, _users, mut rx) = service(1_000);
        presence.connect("u1", "h1").await;
        presence.disconnect("u1", "h1").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        presence.connect("u1", "h2").await;

        let online: Vec<bool> = statuses(&mut rx).iter().map(|s| s.is_online).collect();
        assert_eq!(online, vec![true, false, true]);
    }

    #[tokio::test]
    async fn offline_status_reports_stored_last_seen() {
        let (presence, users, _rx) = service(5_000);
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        *users.last_seen.lock().unwrap() = Some(at);

        let status = presence.status("u9").await;
        assert!(!status.is_online);
        assert_eq!(status.last_seen, Some(at));
    }

    #[tokio::test]
    async fn online_status_omits_last_seen() {
        let (presence, _users, _rx) = service(5_000);
        presence.connect("u1", "h1").await;
        let status = presence.status("u1").await;
        assert!(status.is_online);
        assert_eq!(status.last_seen, None);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_during_offline_write_is_announced_after_it() {
        let users = Users {
            write_delay: Duration::from_millis(100),
            ..Users::default()
        };
        let (presence, _users, mut rx) = service_with(1_000, users);
        presence.connect("u1", "h1").await;
        presence.disconnect("u1", "h1").await;

        // The offline transition is mid-write when the user comes back.
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        presence.connect("u1", "h2").await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let online: Vec<bool> = statuses(&mut rx).iter().map(|s| s.is_online).collect();
        assert_eq!(online, vec![true, false, true]);
        assert!(presence.status("u1").await.is_online);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_queued_before_the_elapsed_timer_is_a_resume() {
        let (presence, users, mut rx) = service(1_000);
        presence.connect("u1", "h1").await;
        statuses(&mut rx);
        presence.disconnect("u1", "h1").await;

        // Hold the identity's lock so the reconnect queues first and the timer
        // fires behind it without claiming its slot.
        let lock = presence.lock_for("u1");
        let guard = lock.lock().await;
        let reconnect = tokio::spawn({
            let presence = presence.clone();
            async move { presence.connect("u1", "h2").await }
        });
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        drop(guard);
        drop(lock);

        assert_eq!(reconnect.await.unwrap(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(statuses(&mut rx).is_empty());
        assert_eq!(users.online.lock().unwrap().len(), 1);
        assert!(presence.status("u1").await.is_online);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_disconnect_and_connect_announce_nothing_new() {
        let (presence, _users, mut rx) = service(1_000);
        presence.connect("u1", "h1").await;
        statuses(&mut rx);

        let (_, count) = tokio::join!(presence.disconnect("u1", "h1"), presence.connect("u1", "h2"));
        assert_eq!(count, 1);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(statuses(&mut rx).is_empty());
        assert!(presence.status("u1").await.is_online);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_now_goes_offline_without_waiting() {
        let (presence, users, mut rx) = service(60_000);
        presence.connect("u1", "h1").await;
        statuses(&mut rx);

        assert_eq!(presence.disconnect_now("u1", "h1").await, 0);
        let events = statuses(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_online);
        assert_eq!(
            users.online.lock().unwrap().last(),
            Some(&("u1".to_string(), false))
        );
    }

    #[tokio::test]
    async fn wait_idle_resolves_after_the_last_disconnect() {
        let (presence, _users, _rx) = service(5_000);
        presence.wait_idle().await;

        presence.connect("u1", "h1").await;
        presence.connect("u2", "h2").await;
        let waiter = tokio::spawn({
            let presence = presence.clone();
            async move { presence.wait_idle().await }
        });
        presence.disconnect("u1", "h1").await;
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        presence.disconnect_now("u2", "h2").await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("idle after last disconnect")
            .unwrap();
    }
}
