//! # Endpoint configuration transactions
//!
//! A PJSIP endpoint is three sections of `pjsip.conf` (endpoint, auth and
//! aor) that reference each other. The manager interface can only edit one
//! file per action and has no multi-section atomicity, so every operation
//! here is a sequence of `UpdateConfig` steps that is best effort by
//! construction:
//!
//! ```text
//! create:  discover ─► DelCat old ─► endpoint (no reload) ─► auth (no reload) ─► aor (reload)
//! update:  discover ─► one batched UpdateConfig (reload)
//! delete:  discover ─► DelCat x3 ─► dialplan cleanup ─► Reload ─► verify
//! ```
//!
//! All three sections are named after the endpoint id and told apart by
//! their `type` line. Existing sections are addressed with a
//! `Match: type=<kind>` category filter. A fresh auth or aor category is
//! inserted ahead of its same-named siblings (`NewCat` with `Match: <id>`)
//! so the unfiltered `Append`s that follow land in it.
//!
//! Failed steps are never rolled back.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use ispbx_ami_core::{Action, ActionSubmitter, AmiError, AmiResult, ConfigOp, Reply, StepFailure};

use crate::config::PbxConfig;
use crate::parsers::{parse_config_sections, ConfigSection, SectionKind};

/// Fields for a new endpoint. Unset options fall back to [`PbxConfig`] defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewEndpoint {
    pub id: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub name: Option<String>,
    pub context: Option<String>,
    pub transport: Option<String>,
    pub codecs: Option<String>,
    pub max_contacts: Option<u32>,
}

impl NewEndpoint {
    pub fn new(id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Fields to change on an existing endpoint. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointUpdate {
    pub name: Option<String>,
    pub context: Option<String>,
    pub transport: Option<String>,
    pub direct_media: Option<String>,
    pub codecs: Option<String>,
    pub password: Option<String>,
    pub max_contacts: Option<u32>,
    pub qualify_frequency: Option<u32>,
    pub qualify_timeout: Option<u32>,
}

impl EndpointUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Result of a successful update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UpdateResult {
    Updated { fields: Vec<String> },
    NoChanges,
}

/// What a delete removed and which steps failed without failing the whole
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub endpoint_id: String,
    pub removed: Vec<String>,
    pub failed: Vec<StepFailure>,
    pub dialplan_lines_removed: usize,
}

/// The sections currently configured for one endpoint id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSections {
    pub endpoint: Option<ConfigSection>,
    pub auths: Vec<ConfigSection>,
    pub aors: Vec<ConfigSection>,
}

impl EndpointSections {
    /// Locate the sections of `id`: by name, and through the endpoint's
    /// `auth` / `aors` references so suffixed names are found too.
    pub fn discover(id: &str, sections: &[ConfigSection]) -> Self {
        let endpoint = sections
            .iter()
            .find(|s| s.name == id && s.is(&SectionKind::Endpoint))
            .cloned();

        let references = |variable: &str| -> Vec<String> {
            let mut names = vec![id.to_string()];
            if let Some(endpoint) = &endpoint {
                for value in endpoint.get_all(variable) {
                    for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                        if !names.iter().any(|n| n == name) {
                            names.push(name.to_string());
                        }
                    }
                }
            }
            names
        };
        let pick = |kind: SectionKind, names: Vec<String>| -> Vec<ConfigSection> {
            sections
                .iter()
                .filter(|s| s.is(&kind) && names.iter().any(|n| n == &s.name))
                .cloned()
                .collect()
        };

        let auths = pick(SectionKind::Auth, references("auth"));
        let aors = pick(SectionKind::Aor, references("aors"));
        Self { endpoint, auths, aors }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoint.is_none() && self.auths.is_empty() && self.aors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoint.iter().count() + self.auths.len() + self.aors.len()
    }

    /// Every section with its kind, endpoint first
    pub fn all(&self) -> impl Iterator<Item = &ConfigSection> {
        self.endpoint.iter().chain(self.auths.iter()).chain(self.aors.iter())
    }
}

fn kind_filter(kind: &SectionKind) -> String {
    format!("type={}", kind)
}

fn is_missing_category(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("not found") || message.contains("unknown category") || message.contains("does not exist")
}

/// Runs the multi-step endpoint edits against the switch
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use ispbx_ami_core::{AmiConfig, AmiConnection, EventRouter};
/// use ispbx_pbx_core::{ConfigTransactions, EndpointUpdate, NewEndpoint, PbxConfig};
///
/// # async fn demo() -> ispbx_ami_core::AmiResult<()> {
/// let connection = AmiConnection::new(AmiConfig::default(), EventRouter::new());
/// connection.connect().await?;
/// let txn = ConfigTransactions::new(Arc::new(connection), PbxConfig::default());
///
/// txn.create(&NewEndpoint::new("1001", "s3cret").with_name("Alice")).await?;
///
/// let changes = EndpointUpdate {
///     context: Some("office".into()),
///     ..Default::default()
/// };
/// txn.update("1001", &changes).await?;
///
/// let report = txn.delete("1001").await?;
/// println!("removed {:?}, failed {}", report.removed, report.failed.len());
/// # Ok(())
/// # }
/// ```
pub struct ConfigTransactions {
    submitter: Arc<dyn ActionSubmitter>,
    config: PbxConfig,
}

impl ConfigTransactions {
    pub fn new(submitter: Arc<dyn ActionSubmitter>, config: PbxConfig) -> Self {
        Self { submitter, config }
    }

    pub fn config(&self) -> &PbxConfig {
        &self.config
    }

    /// Read and parse a configuration file
    pub async fn read_sections(&self, filename: &str) -> AmiResult<Vec<ConfigSection>> {
        let reply = self
            .submitter
            .submit(Action::get_config(filename))
            .await?
            .into_result("GetConfig")?;
        Ok(parse_config_sections(reply.records()))
    }

    pub async fn discover(&self, id: &str) -> AmiResult<EndpointSections> {
        let sections = self.read_sections(&self.config.pjsip_file).await?;
        Ok(EndpointSections::discover(id, &sections))
    }

    async fn apply(&self, action: Action) -> AmiResult<Reply> {
        debug!(action = %action, "Applying configuration step");
        self.submitter.submit(action).await
    }

    /// Create the three sections of `endpoint`, replacing any existing ones.
    ///
    /// Only the last step asks the switch to reload PJSIP, so the endpoint
    /// never goes live while its auth or aor is missing. A failing step
    /// aborts the sequence with the switch's message.
    pub async fn create(&self, endpoint: &NewEndpoint) -> AmiResult<()> {
        let id = endpoint.id.as_str();
        if id.trim().is_empty() {
            return Err(AmiError::config("endpoint id must not be empty"));
        }
        info!(endpoint = id, "Creating endpoint configuration");

        let mut completed: Vec<String> = Vec::new();

        let existing = self.discover(id).await?;
        if !existing.is_empty() {
            for section in existing.all() {
                let step = format!("remove existing {} section {}", section.kind, section.name);
                let reply = self.apply(self.delete_section_action(section)).await?;
                if reply.is_error() && !is_missing_category(reply.message()) {
                    return Err(Self::abort(completed, step, reply.message()));
                }
            }
            completed.push("remove existing sections".to_string());
        }

        let steps = [
            ("create endpoint section", self.endpoint_section_action(endpoint)),
            ("create auth section", self.auth_section_action(endpoint)),
            ("create aor section", self.aor_section_action(endpoint)),
        ];
        for (step, action) in steps {
            let reply = self.apply(action).await?;
            if reply.is_error() {
                warn!(endpoint = id, step, message = reply.message(), "Endpoint creation aborted");
                return Err(Self::abort(completed, step.to_string(), reply.message()));
            }
            completed.push(step.to_string());
        }

        info!(endpoint = id, "Endpoint configuration created");
        Ok(())
    }

    fn abort(completed: Vec<String>, step: String, message: &str) -> AmiError {
        if completed.is_empty() {
            AmiError::protocol("UpdateConfig", message)
        } else {
            AmiError::PartialFailure {
                completed,
                failed: vec![StepFailure::new(step, message)],
            }
        }
    }

    fn endpoint_section_action(&self, endpoint: &NewEndpoint) -> Action {
        let defaults = &self.config.defaults;
        let id = endpoint.id.as_str();
        let name = endpoint.name.as_deref().unwrap_or(id);
        let fields: [(&str, String); 13] = [
            ("type", "endpoint".to_string()),
            ("callerid", format!("\"{}\" <{}>", name, id)),
            ("auth", id.to_string()),
            ("aors", id.to_string()),
            ("context", endpoint.context.clone().unwrap_or_else(|| defaults.context.clone())),
            ("transport", endpoint.transport.clone().unwrap_or_else(|| defaults.transport.clone())),
            ("disallow", "all".to_string()),
            ("allow", endpoint.codecs.clone().unwrap_or_else(|| defaults.codecs.clone())),
            ("direct_media", defaults.direct_media.clone()),
            ("rewrite_contact", "yes".to_string()),
            ("rtp_symmetric", "yes".to_string()),
            ("force_rport", "yes".to_string()),
            ("identify_by", "username".to_string()),
        ];
        self.new_section_action(id, None, &fields, "no")
    }

    fn auth_section_action(&self, endpoint: &NewEndpoint) -> Action {
        let id = endpoint.id.as_str();
        let fields: [(&str, String); 4] = [
            ("type", "auth".to_string()),
            ("auth_type", "userpass".to_string()),
            ("username", id.to_string()),
            ("password", endpoint.password.clone()),
        ];
        self.new_section_action(id, Some(id), &fields, "no")
    }

    fn aor_section_action(&self, endpoint: &NewEndpoint) -> Action {
        let defaults = &self.config.defaults;
        let id = endpoint.id.as_str();
        let fields: [(&str, String); 4] = [
            ("type", "aor".to_string()),
            ("max_contacts", endpoint.max_contacts.unwrap_or(defaults.max_contacts).to_string()),
            ("qualify_frequency", defaults.qualify_frequency.to_string()),
            ("remove_existing", "yes".to_string()),
        ];
        self.new_section_action(id, Some(id), &fields, &self.config.pjsip_module)
    }

    fn new_section_action(&self, name: &str, insert_before: Option<&str>, fields: &[(&str, String)], reload: &str) -> Action {
        let mut new_cat = ConfigOp::new_category(name).with_options("allowdups");
        if let Some(sibling) = insert_before {
            new_cat = new_cat.with_match(sibling);
        }
        let mut action = Action::update_config(&self.config.pjsip_file, reload).op(new_cat);
        for (variable, value) in fields {
            action.push_op(ConfigOp::append(name, *variable, value.as_str()));
        }
        action
    }

    fn delete_section_action(&self, section: &ConfigSection) -> Action {
        Action::update_config(&self.config.pjsip_file, "no")
            .op(ConfigOp::delete_category(section.name.as_str()).with_match(kind_filter(&section.kind)))
    }

    /// Apply the supplied fields in one batched edit.
    ///
    /// Variables already present in a section are updated in place, absent
    /// ones are appended.
    pub async fn update(&self, id: &str, changes: &EndpointUpdate) -> AmiResult<UpdateResult> {
        if changes.is_empty() {
            debug!(endpoint = id, "Update without fields");
            return Ok(UpdateResult::NoChanges);
        }

        let sections = self.discover(id).await?;
        let Some(endpoint) = sections.endpoint.as_ref() else {
            return Err(AmiError::not_found(format!("endpoint {}", id)));
        };
        let auth = sections.auths.first();
        let aor = sections.aors.first();

        let mut action = Action::update_config(&self.config.pjsip_file, &self.config.pjsip_module);
        let mut fields: Vec<String> = Vec::new();
        let mut set = |target: Option<&ConfigSection>, kind: SectionKind, variable: &str, value: String, field: &str| {
            let name = target.map(|s| s.name.as_str()).unwrap_or(id);
            let exists = target.map(|s| s.get(variable).is_some()).unwrap_or(false);
            let op = if exists {
                ConfigOp::update(name, variable, value)
            } else {
                ConfigOp::append(name, variable, value)
            };
            action.push_op(op.with_match(kind_filter(&kind)));
            if !fields.iter().any(|f| f == field) {
                fields.push(field.to_string());
            }
        };

        let endpoint = Some(endpoint);
        if let Some(name) = &changes.name {
            set(endpoint, SectionKind::Endpoint, "callerid", format!("\"{}\" <{}>", name, id), "name");
        }
        if let Some(context) = &changes.context {
            set(endpoint, SectionKind::Endpoint, "context", context.clone(), "context");
        }
        if let Some(transport) = &changes.transport {
            set(endpoint, SectionKind::Endpoint, "transport", transport.clone(), "transport");
        }
        if let Some(direct_media) = &changes.direct_media {
            set(endpoint, SectionKind::Endpoint, "direct_media", direct_media.clone(), "direct_media");
        }
        if let Some(codecs) = &changes.codecs {
            set(endpoint, SectionKind::Endpoint, "disallow", "all".to_string(), "codecs");
            set(endpoint, SectionKind::Endpoint, "allow", codecs.clone(), "codecs");
        }
        if let Some(password) = &changes.password {
            set(auth, SectionKind::Auth, "password", password.clone(), "password");
        }
        if let Some(max_contacts) = changes.max_contacts {
            set(aor, SectionKind::Aor, "max_contacts", max_contacts.to_string(), "max_contacts");
        }
        if let Some(frequency) = changes.qualify_frequency {
            set(aor, SectionKind::Aor, "qualify_frequency", frequency.to_string(), "qualify_frequency");
        }
        if let Some(timeout) = changes.qualify_timeout {
            set(aor, SectionKind::Aor, "qualify_timeout", timeout.to_string(), "qualify_timeout");
        }

        self.apply(action).await?.into_result("UpdateConfig")?;
        info!(endpoint = id, ?fields, "Endpoint configuration updated");
        Ok(UpdateResult::Updated { fields })
    }

    /// Remove every section of `id` and its dialplan lines, then reload.
    ///
    /// Individual step failures are collected in the report. The operation
    /// fails only when the endpoint section is still configured afterwards.
    pub async fn delete(&self, id: &str) -> AmiResult<DeleteReport> {
        let sections = self.discover(id).await?;
        if sections.is_empty() {
            return Err(AmiError::not_found(format!("endpoint {}", id)));
        }
        info!(endpoint = id, sections = sections.len(), "Deleting endpoint configuration");

        let mut report = DeleteReport {
            endpoint_id: id.to_string(),
            ..Default::default()
        };

        for section in sections.all() {
            let step = format!("delete {} section {}", section.kind, section.name);
            match self.apply(self.delete_section_action(section)).await {
                Ok(reply) if !reply.is_error() => report.removed.push(step),
                Ok(reply) => report.failed.push(StepFailure::new(step, reply.message())),
                Err(e) => report.failed.push(StepFailure::new(step, e.user_message())),
            }
        }

        match self.remove_dialplan_entries(id).await {
            Ok(count) => report.dialplan_lines_removed = count,
            Err(e) => warn!(endpoint = id, error = %e, "Dialplan cleanup failed"),
        }

        let reload = Action::reload_module(&self.config.pjsip_module);
        match self.apply(reload).await {
            Ok(reply) if reply.is_error() => report.failed.push(StepFailure::new("reload", reply.message())),
            Ok(_) => {}
            Err(e) => report.failed.push(StepFailure::new("reload", e.user_message())),
        }

        let remaining = self.discover(id).await?;
        if remaining.endpoint.is_some() {
            warn!(endpoint = id, "Endpoint section still present after delete");
            report
                .failed
                .push(StepFailure::new("verify", format!("endpoint section {} is still configured", id)));
            return Err(AmiError::PartialFailure {
                completed: report.removed,
                failed: report.failed,
            });
        }

        if !report.failed.is_empty() {
            warn!(endpoint = id, failed = report.failed.len(), "Endpoint deleted with failed steps");
        }
        info!(endpoint = id, "Endpoint configuration deleted");
        Ok(report)
    }

    /// Delete `exten => <id>,...` lines. Returns how many were removed.
    async fn remove_dialplan_entries(&self, id: &str) -> AmiResult<usize> {
        let prefix = format!("{},", id);
        let sections = self.read_sections(&self.config.dialplan_file).await?;

        let mut action = Action::update_config(&self.config.dialplan_file, "no");
        for section in &sections {
            for line in section.get_all("exten").filter(|v| v.starts_with(&prefix)) {
                action.push_op(ConfigOp::delete(section.name.as_str(), "exten").with_match(line));
            }
        }

        let count = action.config_ops().len();
        if count == 0 {
            return Ok(0);
        }
        self.apply(action).await?.into_result("UpdateConfig")?;
        debug!(endpoint = id, lines = count, "Dialplan entries removed");
        Ok(count)
    }
}
