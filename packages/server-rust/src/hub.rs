//! Client hub: registry of live connections and their subscriptions.
//!
//! Uses `DashMap` for lock-free concurrent tracking so broadcast fan-out
//! never contends with connect/disconnect churn. Node implementations
//! build their `add_client_conn`/`add_client_sub` surface on top of it.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use surge_core::DisconnectAdvice;

use crate::traits::ClientConn;

/// Thread-safe registry of connections indexed by uid, user, and channel.
#[derive(Default)]
pub struct Hub {
    conns: DashMap<String, Arc<dyn ClientConn>>,
    users: DashMap<String, HashSet<String>>,
    subs: DashMap<String, HashSet<String>>,
}

impl Hub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under its uid and user.
    pub fn add(&self, user: &str, conn: Arc<dyn ClientConn>) {
        let uid = conn.uid().to_string();
        self.users
            .entry(user.to_string())
            .or_default()
            .insert(uid.clone());
        self.conns.insert(uid, conn);
    }

    /// Removes a connection, returning its handle if it was present.
    pub fn remove(&self, user: &str, uid: &str) -> Option<Arc<dyn ClientConn>> {
        if let Some(mut uids) = self.users.get_mut(user) {
            uids.remove(uid);
        }
        self.users.remove_if(user, |_, uids| uids.is_empty());
        self.conns.remove(uid).map(|(_, conn)| conn)
    }

    /// Registers a channel subscription for a connection.
    pub fn add_sub(&self, channel: &str, conn: &Arc<dyn ClientConn>) {
        self.subs
            .entry(channel.to_string())
            .or_default()
            .insert(conn.uid().to_string());
    }

    /// Removes a channel subscription, dropping the channel entry once
    /// its last member leaves.
    pub fn remove_sub(&self, channel: &str, uid: &str) {
        if let Some(mut uids) = self.subs.get_mut(channel) {
            uids.remove(uid);
        }
        self.subs.remove_if(channel, |_, uids| uids.is_empty());
    }

    /// Number of live connections authenticated as `user`.
    #[must_use]
    pub fn user_connections(&self, user: &str) -> usize {
        self.users.get(user).map_or(0, |uids| uids.len())
    }

    /// Total number of registered connections.
    #[must_use]
    pub fn num_clients(&self) -> usize {
        self.conns.len()
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.subs.len()
    }

    /// Channels with at least one subscriber.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.subs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Sends a frame to every subscriber of a channel.
    ///
    /// Per-connection errors are ignored: a slow or closed member
    /// schedules its own teardown and must not stall the fan-out.
    pub fn broadcast(&self, channel: &str, frame: &Bytes) {
        let Some(uids) = self.subs.get(channel) else {
            return;
        };
        for uid in uids.iter() {
            if let Some(conn) = self.conns.get(uid) {
                let _ = conn.send(frame.clone());
            }
        }
    }

    /// Closes every registered connection with the shutdown advice.
    pub async fn shutdown(&self) {
        let conns: Vec<Arc<dyn ClientConn>> = self
            .conns
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for conn in conns {
            conn.close(Some(DisconnectAdvice::new("shutting down", true)))
                .await;
        }
    }
}
