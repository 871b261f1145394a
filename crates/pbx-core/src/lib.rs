//! # ispbx-pbx-core
//!
//! PJSIP endpoint, queue and call administration on top of
//! [`ispbx_ami_core`].
//!
//! - [`parsers`]: pure transforms from reply records to typed objects
//! - [`config_txn`]: multi-step create/update/delete of endpoint sections
//! - [`managers`]: endpoint, queue and call operations
//! - [`state`]: live endpoint state fed by notifications
//! - [`gateway`]: the [`PbxGateway`] facade returning [`Outcome`]s

pub mod config;
pub mod config_txn;
pub mod gateway;
pub mod managers;
pub mod outcome;
pub mod parsers;
pub mod state;

pub use config::{EndpointDefaults, PbxConfig};
pub use config_txn::{
    ConfigTransactions, DeleteReport, EndpointSections, EndpointUpdate, NewEndpoint, UpdateResult,
};
pub use gateway::PbxGateway;
pub use managers::{CallManager, EndpointManager, EndpointView, ExtensionStatus, NewQueueMember, QueueManager};
pub use outcome::{Outcome, OutcomeStatus};
pub use state::{EndpointState, EndpointStateCache};
