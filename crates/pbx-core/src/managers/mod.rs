//! Entity managers
//!
//! Each manager turns domain requests into actions, submits them through an
//! [`ActionSubmitter`](ispbx_ami_core::ActionSubmitter) and parses the
//! replies. None of them touches the socket.

pub mod call;
pub mod endpoint;
pub mod queue;

pub use call::CallManager;
pub use endpoint::{EndpointManager, EndpointView, ExtensionStatus};
pub use queue::{NewQueueMember, QueueManager};
