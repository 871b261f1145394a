//! # PBX gateway facade
//!
//! [`PbxGateway`] is the single entry point for front ends and event relays.
//! It owns the connection handle, the entity managers and the endpoint state
//! cache, and converts every result into an [`Outcome`] so no error crosses
//! this boundary as an `Err`.
//!
//! ```rust,no_run
//! use ispbx_ami_core::AmiConfig;
//! use ispbx_pbx_core::{PbxConfig, PbxGateway};
//!
//! # async fn demo() -> ispbx_ami_core::AmiResult<()> {
//! let gateway = PbxGateway::connect_new(AmiConfig::default(), PbxConfig::default()).await?;
//! let calls = gateway.list_active_calls().await;
//! println!("{}", serde_json::to_string_pretty(&calls).unwrap_or_default());
//! gateway.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use ispbx_ami_core::{
    ActionSubmitter, AmiConfig, AmiConnection, AmiResult, ConnectionState, EventFilter, EventRouter,
    NotificationHandler, SubscriptionId,
};

use crate::config::PbxConfig;
use crate::config_txn::{DeleteReport, EndpointUpdate, NewEndpoint, UpdateResult};
use crate::managers::{CallManager, EndpointManager, EndpointView, ExtensionStatus, QueueManager};
use crate::outcome::Outcome;
use crate::parsers::{ActiveCall, Channel, QueueSummary};
use crate::state::{EndpointState, EndpointStateCache};

pub struct PbxGateway {
    connection: Option<AmiConnection>,
    router: Arc<EventRouter>,
    endpoints: EndpointManager,
    queues: QueueManager,
    calls: CallManager,
    cache: Arc<EndpointStateCache>,
    cache_subscription: Mutex<Option<SubscriptionId>>,
}

impl PbxGateway {
    /// Gateway over a managed connection. Call [`start`](Self::start) to connect.
    pub fn new(ami: AmiConfig, pbx: PbxConfig) -> Self {
        let router = EventRouter::with_handler_timeout(ami.handler_timeout());
        let connection = AmiConnection::new(ami, router.clone());
        Self::with_connection(connection, pbx)
    }

    pub fn with_connection(connection: AmiConnection, pbx: PbxConfig) -> Self {
        let router = connection.router().clone();
        let submitter: Arc<dyn ActionSubmitter> = Arc::new(connection.clone());
        Self::build(Some(connection), submitter, router, pbx)
    }

    /// Gateway over any submitter, without connection lifecycle management
    pub fn with_submitter(submitter: Arc<dyn ActionSubmitter>, router: Arc<EventRouter>, pbx: PbxConfig) -> Self {
        Self::build(None, submitter, router, pbx)
    }

    fn build(
        connection: Option<AmiConnection>,
        submitter: Arc<dyn ActionSubmitter>,
        router: Arc<EventRouter>,
        pbx: PbxConfig,
    ) -> Self {
        let cache = Arc::new(EndpointStateCache::new());
        Self {
            connection,
            router,
            endpoints: EndpointManager::new(submitter.clone(), pbx, cache.clone()),
            queues: QueueManager::new(submitter.clone()),
            calls: CallManager::new(submitter),
            cache,
            cache_subscription: Mutex::new(None),
        }
    }

    /// Build, register the cache and connect
    pub async fn connect_new(ami: AmiConfig, pbx: PbxConfig) -> AmiResult<Self> {
        ami.validate()?;
        pbx.validate()?;
        let gateway = Self::new(ami, pbx);
        gateway.start().await?;
        Ok(gateway)
    }

    /// Register the state cache on the router and connect, if this gateway
    /// manages a connection. Must run inside a Tokio runtime.
    pub async fn start(&self) -> AmiResult<()> {
        {
            let mut subscription = self.cache_subscription.lock();
            if subscription.is_none() {
                *subscription = Some(self.router.subscribe(EndpointStateCache::filter(), self.cache.clone()));
            }
        }
        if let Some(connection) = &self.connection {
            connection.connect().await?;
        }
        info!("PBX gateway started");
        Ok(())
    }

    /// Close the connection and stop cache updates
    pub async fn shutdown(&self) {
        if let Some(id) = self.cache_subscription.lock().take() {
            self.router.unsubscribe(id);
        }
        if let Some(connection) = &self.connection {
            if let Err(e) = connection.shutdown().await {
                warn!(error = %e, "Connection shutdown reported an error");
            }
        }
        info!("PBX gateway stopped");
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map(|c| c.state())
            .unwrap_or(ConnectionState::Ready)
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn endpoints(&self) -> &EndpointManager {
        &self.endpoints
    }

    pub fn queues(&self) -> &QueueManager {
        &self.queues
    }

    pub fn calls(&self) -> &CallManager {
        &self.calls
    }

    /// Relay hook: every matching notification is handed to `handler`
    pub fn subscribe(&self, filter: EventFilter, handler: Arc<dyn NotificationHandler>) -> SubscriptionId {
        self.router.subscribe(filter, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.router.unsubscribe(id)
    }

    // Endpoints

    pub async fn get_endpoint(&self, id: Option<&str>) -> Outcome<EndpointView> {
        match self.endpoints.get_endpoint(id).await {
            Ok(view @ EndpointView::Detail { .. }) => {
                let exists = matches!(&view, EndpointView::Detail { detail, .. } if detail.exists_in_config);
                let id = id.unwrap_or_default();
                if exists {
                    Outcome::success(format!("Endpoint {}", id), view)
                } else {
                    Outcome::not_found(format!("Endpoint {} not found", id)).with_payload(view)
                }
            }
            Ok(view) => Outcome::success("Endpoints", view),
            Err(e) => Outcome::from_error(&e),
        }
    }

    pub async fn create_endpoint(&self, endpoint: &NewEndpoint) -> Outcome<EndpointView> {
        if let Err(e) = self.endpoints.create_endpoint(endpoint).await {
            return Outcome::from_error(&e);
        }
        let message = format!("Endpoint {} created", endpoint.id);
        match self.endpoints.get_endpoint(Some(endpoint.id.as_str())).await {
            Ok(view) => Outcome::success(message, view),
            Err(e) => {
                warn!(endpoint = %endpoint.id, error = %e, "Created endpoint could not be read back");
                Outcome::done(message)
            }
        }
    }

    pub async fn update_endpoint(&self, id: &str, changes: &EndpointUpdate) -> Outcome<UpdateResult> {
        match self.endpoints.update_endpoint(id, changes).await {
            Ok(UpdateResult::NoChanges) => Outcome::no_changes("No fields to update"),
            Ok(result) => Outcome::success(format!("Endpoint {} updated", id), result),
            Err(e) => Outcome::from_error(&e),
        }
    }

    pub async fn delete_endpoint(&self, id: &str) -> Outcome<DeleteReport> {
        let result = self.endpoints.delete_endpoint(id).await;
        Outcome::from_result(result, format!("Endpoint {} deleted", id))
    }

    pub async fn extension_state(&self, id: &str) -> Outcome<ExtensionStatus> {
        let result = self.endpoints.extension_state(id, None).await;
        Outcome::from_result(result, format!("Extension state of {}", id))
    }

    pub async fn refresh_endpoint_state(&self, id: &str) -> Outcome<EndpointState> {
        let result = self.endpoints.refresh_state(id).await;
        Outcome::from_result(result, format!("State of {} refreshed", id))
    }

    pub fn endpoint_states(&self) -> Vec<EndpointState> {
        self.cache.snapshot()
    }

    // Calls

    pub async fn list_active_calls(&self) -> Outcome<Vec<ActiveCall>> {
        let result = self.calls.list_active_calls().await;
        let message = match &result {
            Ok(calls) => format!("{} active call(s)", calls.len()),
            Err(_) => String::new(),
        };
        Outcome::from_result(result, message)
    }

    pub async fn list_channels(&self) -> Outcome<Vec<Channel>> {
        Outcome::from_result(self.calls.list_channels().await, "Channels")
    }

    pub async fn hangup(&self, channel: &str) -> Outcome<()> {
        Outcome::from_result(self.calls.hangup(channel).await, format!("Channel {} hung up", channel))
    }

    // Queues

    pub async fn get_queue_status(&self, name: Option<&str>) -> Outcome<Vec<QueueSummary>> {
        let message = match name {
            Some(name) => format!("Queue {}", name),
            None => "Queues".to_string(),
        };
        Outcome::from_result(self.queues.get_queue_status(name).await, message)
    }

    pub async fn reload_queue(&self, name: Option<&str>) -> Outcome<()> {
        let message = format!("Queue {} reloaded", name.unwrap_or("configuration"));
        Outcome::from_result(self.queues.reload(name).await, message)
    }
}
