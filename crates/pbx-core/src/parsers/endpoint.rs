//! Endpoint listing and detail replies

use ispbx_ami_core::Record;
use serde::Serialize;

/// One row of `PJSIPShowEndpoints`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointSummary {
    pub id: String,
    pub device_state: String,
    pub active_channels: String,
    pub aors: String,
    pub auths: String,
    pub contacts: String,
}

/// Fields of the endpoint section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointSection {
    pub context: String,
    pub codecs: String,
    pub device_state: String,
    pub direct_media: String,
    pub transport: String,
    pub aors: String,
    pub auth: String,
    pub outbound_auth: String,
    pub caller_id: String,
    pub mailboxes: String,
}

/// Fields of the auth section. The secret is never copied out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthSection {
    pub username: String,
    pub auth_type: String,
    pub realm: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AorSection {
    pub contacts: String,
    pub max_contacts: String,
    pub contacts_registered: String,
    pub default_expiration: String,
    pub minimum_expiration: String,
    pub maximum_expiration: String,
    pub qualify_frequency: String,
    pub qualify_timeout: String,
}

/// Live contact bound to an address-of-record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContactStatus {
    pub uri: String,
    pub status: String,
    pub roundtrip_usec: String,
    pub endpoint_name: String,
    pub via_address: String,
    pub user_agent: String,
    pub reg_expire: String,
    pub id: String,
}

/// Parsed `PJSIPShowEndpoint` reply.
///
/// Sections the reply did not carry stay at their empty defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointInfo {
    pub id: String,
    pub exists_in_config: bool,
    pub endpoint: EndpointSection,
    pub auth: AuthSection,
    pub aor: AorSection,
    pub contacts: Vec<ContactStatus>,
}

/// Display name and number split out of a caller id string
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallerId {
    pub name: String,
    pub number: String,
}

fn event_is(record: &Record, name: &str) -> bool {
    record
        .event()
        .map(|e| e.eq_ignore_ascii_case(name))
        .unwrap_or(false)
}

pub fn parse_endpoint_list(records: &[Record]) -> Vec<EndpointSummary> {
    records
        .iter()
        .filter(|r| event_is(r, "EndpointList"))
        .filter_map(|r| {
            let id = r.get_or_empty("ObjectName");
            if id.is_empty() {
                return None;
            }
            Some(EndpointSummary {
                id: id.to_string(),
                device_state: r.get_or("DeviceState", "Unknown").to_string(),
                active_channels: r.get_or_empty("ActiveChannels").to_string(),
                aors: r.get_or_empty("Aor").to_string(),
                auths: r.get_or_empty("Auths").to_string(),
                contacts: r.get_or("Contacts", "0").to_string(),
            })
        })
        .collect()
}

/// Group a detail reply into endpoint/auth/aor/contact buckets
pub fn parse_endpoint_detail(id: &str, records: &[Record]) -> EndpointInfo {
    let mut info = EndpointInfo {
        id: id.to_string(),
        ..Default::default()
    };

    for record in records {
        let Some(kind) = record.event() else {
            continue;
        };
        match kind {
            "EndpointDetail" => {
                info.exists_in_config = true;
                info.endpoint = EndpointSection {
                    context: record.get_or_empty("Context").to_string(),
                    codecs: record.get_or_empty("Allow").to_string(),
                    device_state: record.get_or("DeviceState", "Unknown").to_string(),
                    direct_media: record.get_or("DirectMedia", "no").to_string(),
                    transport: record.get_or_empty("Transport").to_string(),
                    aors: record.get_or_empty("Aors").to_string(),
                    auth: record.get_or_empty("Auth").to_string(),
                    outbound_auth: record.get_or_empty("OutboundAuth").to_string(),
                    caller_id: record.get_or_empty("Callerid").to_string(),
                    mailboxes: record.get_or_empty("Mailboxes").to_string(),
                };
            }
            "AuthDetail" => {
                info.auth = AuthSection {
                    username: record.get_or_empty("Username").to_string(),
                    auth_type: record.get_or_empty("AuthType").to_string(),
                    realm: record.get_or_empty("Realm").to_string(),
                };
            }
            "AorDetail" => {
                info.aor = AorSection {
                    contacts: record.get_or_empty("Contacts").to_string(),
                    max_contacts: record.get_or_empty("MaxContacts").to_string(),
                    contacts_registered: record.get_or_empty("ContactsRegistered").to_string(),
                    default_expiration: record.get_or_empty("DefaultExpiration").to_string(),
                    minimum_expiration: record.get_or_empty("MinimumExpiration").to_string(),
                    maximum_expiration: record.get_or_empty("MaximumExpiration").to_string(),
                    qualify_frequency: record.get_or_empty("QualifyFrequency").to_string(),
                    qualify_timeout: record.get_or_empty("QualifyTimeout").to_string(),
                };
            }
            "ContactStatusDetail" => info.contacts.push(parse_contact(record)),
            _ => {}
        }
    }
    info
}

pub(crate) fn parse_contact(record: &Record) -> ContactStatus {
    ContactStatus {
        uri: record.get_or_empty("URI").to_string(),
        status: record.get_or_empty("Status").to_string(),
        roundtrip_usec: record.get_or_empty("RoundtripUsec").to_string(),
        endpoint_name: record.get_or_empty("EndpointName").to_string(),
        via_address: record.get_or_empty("ViaAddress").to_string(),
        user_agent: record.get_or_empty("UserAgent").to_string(),
        reg_expire: record.get_or_empty("RegExpire").to_string(),
        id: record.get_or_empty("ID").to_string(),
    }
}

/// Split `"Alice" <1001>` into its display name and number
pub fn parse_caller_id(raw: &str) -> CallerId {
    let raw = raw.trim();
    let (head, number) = match (raw.find('<'), raw.rfind('>')) {
        (Some(open), Some(close)) if open < close => (&raw[..open], raw[open + 1..close].trim()),
        _ => (raw, ""),
    };
    let head = head.trim();
    let name = match head.strip_prefix('"') {
        Some(rest) => rest.split('"').next().unwrap_or(""),
        None if !number.is_empty() => head,
        None => "",
    };
    CallerId {
        name: name.to_string(),
        number: number.to_string(),
    }
}

/// Map the numeric `ExtensionState` status to its symbolic name
pub fn extension_state_name(status: &str) -> &'static str {
    match status.trim().parse::<i32>() {
        Ok(0) => "IDLE",
        Ok(1) => "IN_USE",
        Ok(2) => "BUSY",
        Ok(4) => "UNAVAILABLE",
        Ok(8) => "RINGING",
        Ok(16) => "ON_HOLD",
        _ => "UNKNOWN",
    }
}
