//! Inbound registration status

use ispbx_ami_core::Record;
use serde::Serialize;

/// Registration of one endpoint. The default value means "unregistered".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationStatus {
    pub registered: bool,
    pub address: String,
    pub port: String,
    pub user_agent: String,
    pub expires: String,
}

impl RegistrationStatus {
    pub fn unregistered() -> Self {
        Self::default()
    }
}

/// First `ContactStatusDetail` whose AOR starts with `endpoint_id` wins
pub fn parse_registration(records: &[Record], endpoint_id: &str) -> RegistrationStatus {
    records
        .iter()
        .find(|r| {
            r.event()
                .map(|e| e.eq_ignore_ascii_case("ContactStatusDetail"))
                .unwrap_or(false)
                && r.get_or_empty("AOR").starts_with(endpoint_id)
        })
        .map(|r| RegistrationStatus {
            registered: r.get_or_empty("Status").eq_ignore_ascii_case("reachable"),
            address: r.get_or_empty("ViaAddress").to_string(),
            port: r.get_or_empty("ViaPort").to_string(),
            user_agent: r.get_or_empty("UserAgent").to_string(),
            expires: r.get_or_empty("RegExpire").to_string(),
        })
        .unwrap_or_else(RegistrationStatus::unregistered)
}
