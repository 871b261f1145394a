//! Call queue status and membership

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use ispbx_ami_core::{Action, ActionSubmitter, AmiError, AmiResult};

use crate::parsers::{parse_queue_status, QueueSummary};

/// Member to add with [`QueueManager::add_member`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewQueueMember {
    pub interface: String,
    pub member_name: Option<String>,
    pub state_interface: Option<String>,
    pub penalty: Option<u32>,
    pub paused: bool,
}

impl NewQueueMember {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ..Default::default()
        }
    }
}

/// Queue status and membership over the manager interface
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use ispbx_ami_core::{AmiConfig, AmiConnection, EventRouter};
/// use ispbx_pbx_core::{NewQueueMember, QueueManager};
///
/// # async fn demo() -> ispbx_ami_core::AmiResult<()> {
/// let connection = AmiConnection::new(AmiConfig::default(), EventRouter::new());
/// connection.connect().await?;
/// let queues = QueueManager::new(Arc::new(connection));
///
/// let member = NewQueueMember {
///     member_name: Some("Alice".into()),
///     ..NewQueueMember::new("PJSIP/1001")
/// };
/// queues.add_member("support", &member).await?;
/// queues.pause_member(Some("support"), "PJSIP/1001", true, Some("lunch")).await?;
///
/// for queue in queues.get_queue_status(Some("support")).await? {
///     println!("{}: {} members", queue.name, queue.members.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct QueueManager {
    submitter: Arc<dyn ActionSubmitter>,
}

impl QueueManager {
    pub fn new(submitter: Arc<dyn ActionSubmitter>) -> Self {
        Self { submitter }
    }

    /// All queues, or only `name`. A named queue that is absent is `NotFound`.
    pub async fn get_queue_status(&self, name: Option<&str>) -> AmiResult<Vec<QueueSummary>> {
        let mut action = Action::new("QueueStatus");
        if let Some(name) = name {
            action.set_param("Queue", name);
        }
        let reply = self.submitter.submit(action).await?.into_result("QueueStatus")?;
        let mut queues = parse_queue_status(reply.records());

        if let Some(name) = name {
            queues.retain(|q| q.name == name);
            if queues.is_empty() {
                return Err(AmiError::not_found(format!("queue {}", name)));
            }
        }
        Ok(queues)
    }

    pub async fn add_member(&self, queue: &str, member: &NewQueueMember) -> AmiResult<()> {
        let mut action = Action::new("QueueAdd")
            .param("Queue", queue)
            .param("Interface", member.interface.as_str())
            .param("Paused", if member.paused { "true" } else { "false" });
        if let Some(name) = &member.member_name {
            action.set_param("MemberName", name.as_str());
        }
        if let Some(state_interface) = &member.state_interface {
            action.set_param("StateInterface", state_interface.as_str());
        }
        if let Some(penalty) = member.penalty {
            action.set_param("Penalty", penalty.to_string());
        }
        self.submitter.submit(action).await?.into_result("QueueAdd")?;
        info!(queue, interface = %member.interface, "Queue member added");
        Ok(())
    }

    pub async fn remove_member(&self, queue: &str, interface: &str) -> AmiResult<()> {
        let action = Action::new("QueueRemove").param("Queue", queue).param("Interface", interface);
        self.submitter.submit(action).await?.into_result("QueueRemove")?;
        info!(queue, interface, "Queue member removed");
        Ok(())
    }

    /// Pause or unpause `interface` in `queue`, or in every queue when `None`
    pub async fn pause_member(
        &self,
        queue: Option<&str>,
        interface: &str,
        paused: bool,
        reason: Option<&str>,
    ) -> AmiResult<()> {
        let mut action = Action::new("QueuePause")
            .param("Interface", interface)
            .param("Paused", if paused { "true" } else { "false" });
        if let Some(queue) = queue {
            action.set_param("Queue", queue);
        }
        if let Some(reason) = reason {
            action.set_param("Reason", reason);
        }
        self.submitter.submit(action).await?.into_result("QueuePause")?;
        info!(queue = queue.unwrap_or("*"), interface, paused, "Queue member pause changed");
        Ok(())
    }

    /// Reload members, rules and parameters of `name`, or of all queues
    pub async fn reload(&self, name: Option<&str>) -> AmiResult<()> {
        let mut action = Action::new("QueueReload")
            .param("Members", "yes")
            .param("Rules", "yes")
            .param("Parameters", "yes");
        if let Some(name) = name {
            action.set_param("Queue", name);
        }
        self.submitter.submit(action).await?.into_result("QueueReload")?;
        info!(queue = name.unwrap_or("*"), "Queues reloaded");
        Ok(())
    }
}
