//! PJSIP endpoint administration

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use ispbx_ami_core::{Action, ActionSubmitter, AmiError, AmiResult};

use crate::config::PbxConfig;
use crate::config_txn::{ConfigTransactions, DeleteReport, EndpointUpdate, NewEndpoint, UpdateResult};
use crate::parsers::{
    extension_state_name, parse_endpoint_detail, parse_endpoint_list, parse_registration, EndpointInfo,
    EndpointSummary, RegistrationStatus,
};
use crate::state::{EndpointState, EndpointStateCache};

/// Either every endpoint or the full picture of one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum EndpointView {
    List { endpoints: Vec<EndpointSummary> },
    Detail { detail: EndpointInfo, registration: RegistrationStatus },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionStatus {
    pub exten: String,
    pub context: String,
    pub code: String,
    pub status: &'static str,
}

pub struct EndpointManager {
    submitter: Arc<dyn ActionSubmitter>,
    transactions: ConfigTransactions,
    cache: Arc<EndpointStateCache>,
}

impl EndpointManager {
    pub fn new(submitter: Arc<dyn ActionSubmitter>, config: PbxConfig, cache: Arc<EndpointStateCache>) -> Self {
        Self {
            transactions: ConfigTransactions::new(submitter.clone(), config),
            submitter,
            cache,
        }
    }

    pub fn transactions(&self) -> &ConfigTransactions {
        &self.transactions
    }

    pub async fn list_endpoints(&self) -> AmiResult<Vec<EndpointSummary>> {
        let reply = self.submitter.submit(Action::new("PJSIPShowEndpoints")).await?;
        if reply.is_error() {
            // An empty configuration is reported as an error by the switch
            if reply.message().to_ascii_lowercase().contains("no endpoints") {
                return Ok(Vec::new());
            }
            return Err(AmiError::protocol("PJSIPShowEndpoints", reply.message()));
        }
        Ok(parse_endpoint_list(reply.records()))
    }

    /// Parsed detail; an unknown id yields `exists_in_config == false`
    pub async fn endpoint_detail(&self, id: &str) -> AmiResult<EndpointInfo> {
        let reply = self
            .submitter
            .submit(Action::new("PJSIPShowEndpoint").param("Endpoint", id))
            .await?;
        Ok(parse_endpoint_detail(id, reply.records()))
    }

    /// Registration of `id`. A failed status query reads as unregistered.
    pub async fn registration(&self, id: &str) -> AmiResult<RegistrationStatus> {
        let reply = self
            .submitter
            .submit(Action::new("PJSIPShowRegistrationInboundContactStatuses"))
            .await?;
        if reply.is_error() {
            debug!(endpoint = id, message = reply.message(), "Contact status query failed");
            return Ok(RegistrationStatus::unregistered());
        }
        Ok(parse_registration(reply.records(), id))
    }

    pub async fn get_endpoint(&self, id: Option<&str>) -> AmiResult<EndpointView> {
        match id {
            None => Ok(EndpointView::List {
                endpoints: self.list_endpoints().await?,
            }),
            Some(id) => {
                let detail = self.endpoint_detail(id).await?;
                let registration = if detail.exists_in_config {
                    self.registration(id).await?
                } else {
                    RegistrationStatus::unregistered()
                };
                Ok(EndpointView::Detail { detail, registration })
            }
        }
    }

    pub async fn create_endpoint(&self, endpoint: &NewEndpoint) -> AmiResult<()> {
        self.transactions.create(endpoint).await?;
        if let Err(e) = self.refresh_state(&endpoint.id).await {
            warn!(endpoint = %endpoint.id, error = %e, "State refresh after create failed");
        }
        Ok(())
    }

    pub async fn update_endpoint(&self, id: &str, changes: &EndpointUpdate) -> AmiResult<UpdateResult> {
        let result = self.transactions.update(id, changes).await?;
        if matches!(result, UpdateResult::Updated { .. }) {
            if let Err(e) = self.refresh_state(id).await {
                warn!(endpoint = id, error = %e, "State refresh after update failed");
            }
        }
        Ok(result)
    }

    pub async fn delete_endpoint(&self, id: &str) -> AmiResult<DeleteReport> {
        let report = self.transactions.delete(id).await?;
        self.cache.remove(id);
        Ok(report)
    }

    /// Hint state of `id` in `context` (the default context when `None`)
    pub async fn extension_state(&self, id: &str, context: Option<&str>) -> AmiResult<ExtensionStatus> {
        let context = context.unwrap_or(&self.transactions.config().defaults.context);
        let reply = self
            .submitter
            .submit(Action::new("ExtensionState").param("Exten", id).param("Context", context))
            .await?
            .into_result("ExtensionState")?;
        let code = reply.response().map(|r| r.get_or("Status", "-1")).unwrap_or("-1");
        Ok(ExtensionStatus {
            exten: id.to_string(),
            context: context.to_string(),
            code: code.to_string(),
            status: extension_state_name(code),
        })
    }

    /// Re-read detail and registration of `id` into the state cache.
    /// An id with no endpoint section is `NotFound` and leaves the cache alone.
    pub async fn refresh_state(&self, id: &str) -> AmiResult<EndpointState> {
        let detail = self.endpoint_detail(id).await?;
        if !detail.exists_in_config {
            return Err(AmiError::not_found(format!("endpoint {}", id)));
        }
        let registration = self.registration(id).await?;
        self.cache.merge(&detail, &registration);
        self.cache
            .get(id)
            .ok_or_else(|| AmiError::not_found(format!("endpoint state {}", id)))
    }

    pub fn cached_state(&self, id: &str) -> Option<EndpointState> {
        self.cache.get(id)
    }
}
