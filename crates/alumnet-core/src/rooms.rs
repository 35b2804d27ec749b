//! Channel naming and the subscriptions a connection starts with.

use crate::directory::GroupDirectory;

pub fn personal_channel(identity: &str) -> String {
    format!("user:{identity}")
}

pub fn group_channel(group_id: &str) -> String {
    format!("group:{group_id}")
}

/// Ad hoc rooms live in their own namespace so a client can never join
/// another user's personal channel or a group it does not belong to.
pub fn adhoc_channel(room: &str) -> String {
    format!("room:{room}")
}

/// Channels a freshly authenticated connection is subscribed to: its own
/// personal channel plus one per group the identity belongs to right now.
///
/// Group membership is a snapshot; a lookup failure degrades to the personal
/// channel alone.
pub async fn initial_channels(groups: &dyn GroupDirectory, identity: &str) -> Vec<String> {
    let mut channels = vec![personal_channel(identity)];
    match groups.groups_containing(identity).await {
        Ok(group_ids) => {
            channels.extend(group_ids.iter().map(|gid| group_channel(gid)));
        }
        Err(e) => {
            tracing::warn!(
                user_id = %identity,
                "group membership lookup failed, continuing with personal channel only: {e}"
            );
        }
    }
    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use async_trait::async_trait;

    struct Groups(Result<Vec<String>, ()>);

    #[async_trait]
    impl GroupDirectory for Groups {
        async fn groups_containing(&self, _identity: &str) -> Result<Vec<String>, CoreError> {
            self.0
                .clone()
                .map_err(|_| CoreError::Internal("lookup timed out".into()))
        }
    }

    #[tokio::test]
    async fn joins_personal_and_group_channels() {
        let groups = Groups(Ok(vec!["class-2009".into(), "robotics".into()]));
        let channels = initial_channels(&groups, "u1").await;
        assert_eq!(
            channels,
            vec!["user:u1", "group:class-2009", "group:robotics"]
        );
    }

    #[tokio::test]
    async fn lookup_failure_keeps_personal_channel() {
        let channels = initial_channels(&Groups(Err(())), "u1").await;
        assert_eq!(channels, vec!["user:u1"]);
    }

    #[test]
    fn adhoc_rooms_cannot_alias_personal_channels() {
        assert_ne!(adhoc_channel("user:u2"), personal_channel("u2"));
    }
}
