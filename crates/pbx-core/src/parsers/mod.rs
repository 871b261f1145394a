//! Pure transforms from reply records to domain objects.
//!
//! None of these fail: missing fields become empty strings or documented
//! defaults so one malformed record cannot abort a listing.

pub mod calls;
pub mod config;
pub mod endpoint;
pub mod queue;
pub mod registration;

pub use calls::{
    extract_extension, parse_active_calls, parse_bridges, parse_channels, project_active_calls, ActiveCall, Bridge,
    Channel,
};
pub use config::{parse_config_sections, ConfigSection, SectionKind};
pub use endpoint::{
    extension_state_name, parse_caller_id, parse_endpoint_detail, parse_endpoint_list, AorSection, AuthSection,
    CallerId, ContactStatus, EndpointInfo, EndpointSection, EndpointSummary,
};
pub use queue::{parse_queue_status, QueueEntry, QueueMember, QueueSummary};
pub use registration::{parse_registration, RegistrationStatus};
