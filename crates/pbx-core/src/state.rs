//! Cached live state per endpoint
//!
//! The cache is fed from two directions: device-state and contact
//! notifications delivered by the router, and explicit refreshes that merge
//! the configured fields read from the switch. Nothing here is ever written
//! back to the switch.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace};

use ispbx_ami_core::{EventFilter, Notification, NotificationHandler};

use crate::parsers::{EndpointInfo, RegistrationStatus};

/// Notification types the cache consumes
pub const STATE_EVENTS: [&str; 3] = ["DeviceStateChange", "ContactStatus", "PeerStatus"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointState {
    pub id: String,
    pub device_state: String,
    /// `None` until a contact notification or refresh has been seen
    pub registered: Option<bool>,
    pub contact_status: String,
    pub contact_uri: String,
    pub address: String,
    pub user_agent: String,
    pub context: String,
    pub transport: String,
    pub codecs: String,
    pub exists_in_config: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl EndpointState {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }
}

/// `PJSIP/1001` -> `1001`; bare names pass through, other devices map to ""
fn endpoint_from_device(device: &str) -> &str {
    match device.split_once('/') {
        Some((tech, rest)) if tech.eq_ignore_ascii_case("PJSIP") => rest.split('-').next().unwrap_or(rest),
        Some(_) => "",
        None if device.contains(':') => "",
        None => device,
    }
}

fn registered_from(status: &str) -> Option<bool> {
    match status.to_ascii_lowercase().as_str() {
        "reachable" | "created" | "updated" | "registered" => Some(true),
        "unreachable" | "removed" | "unregistered" | "rejected" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct EndpointStateCache {
    entries: RwLock<HashMap<String, EndpointState>>,
}

impl EndpointStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter() -> EventFilter {
        EventFilter::types(STATE_EVENTS)
    }

    pub fn get(&self, id: &str) -> Option<EndpointState> {
        self.entries.read().get(id).cloned()
    }

    /// All cached entries sorted by id
    pub fn snapshot(&self) -> Vec<EndpointState> {
        let mut all: Vec<EndpointState> = self.entries.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn remove(&self, id: &str) -> Option<EndpointState> {
        self.entries.write().remove(id)
    }

    fn update(&self, id: &str, at: DateTime<Utc>, f: impl FnOnce(&mut EndpointState)) {
        if id.is_empty() {
            return;
        }
        let mut entries = self.entries.write();
        let entry = entries.entry(id.to_string()).or_insert_with(|| EndpointState::new(id));
        f(entry);
        entry.updated_at = Some(at);
    }

    /// Fold one notification into the cache. Unrelated types are ignored.
    pub fn apply(&self, notification: &Notification) {
        let at = notification.received_at;
        if notification.is("DeviceStateChange") {
            let id = endpoint_from_device(notification.get("Device").unwrap_or(""));
            let state = notification.get("State").unwrap_or("").to_string();
            trace!(endpoint = id, state = %state, "Device state changed");
            self.update(id, at, |e| e.device_state = state);
        } else if notification.is("ContactStatus") {
            let id = match notification.get("EndpointName").filter(|n| !n.is_empty()) {
                Some(name) => name,
                None => notification.get("AOR").unwrap_or(""),
            };
            let status = notification.get("ContactStatus").unwrap_or("").to_string();
            let uri = notification.get("URI").unwrap_or("").to_string();
            self.update(id, at, |e| {
                if let Some(registered) = registered_from(&status) {
                    e.registered = Some(registered);
                }
                e.contact_status = status;
                e.contact_uri = uri;
            });
        } else if notification.is("PeerStatus") {
            let id = endpoint_from_device(notification.get("Peer").unwrap_or(""));
            let status = notification.get("PeerStatus").unwrap_or("").to_string();
            let address = notification.get("Address").map(str::to_string);
            self.update(id, at, |e| {
                if let Some(registered) = registered_from(&status) {
                    e.registered = Some(registered);
                }
                if let Some(address) = address {
                    e.address = address;
                }
            });
        }
    }

    /// Merge a freshly read detail and registration into the cache
    pub fn merge(&self, info: &EndpointInfo, registration: &RegistrationStatus) {
        debug!(endpoint = %info.id, exists = info.exists_in_config, "Refreshing cached endpoint state");
        self.update(&info.id, Utc::now(), |e| {
            e.exists_in_config = info.exists_in_config;
            e.context = info.endpoint.context.clone();
            e.transport = info.endpoint.transport.clone();
            e.codecs = info.endpoint.codecs.clone();
            if !info.endpoint.device_state.is_empty() {
                e.device_state = info.endpoint.device_state.clone();
            }
            e.registered = Some(registration.registered);
            e.address = registration.address.clone();
            e.user_agent = registration.user_agent.clone();
        });
    }
}

#[async_trait]
impl NotificationHandler for EndpointStateCache {
    async fn on_notification(&self, notification: &Notification) -> anyhow::Result<()> {
        self.apply(notification);
        Ok(())
    }
}
