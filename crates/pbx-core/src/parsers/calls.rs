//! Channels, bridges and the active-call projection

use std::collections::{BTreeMap, HashSet};

use ispbx_ami_core::Record;
use serde::Serialize;

/// One call leg from `CoreShowChannels`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub id: String,
    pub extension: String,
    pub state: String,
    pub caller_id: String,
    pub connected_line: String,
    pub duration: String,
    pub unique_id: String,
    pub application: String,
}

/// A mixing bridge and the channels currently in it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Bridge {
    pub id: String,
    pub technology: String,
    pub bridge_type: String,
    pub channels: Vec<String>,
}

/// A channel that is not a member of any bridge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActiveCall {
    pub id: String,
    pub extension: String,
    pub state: String,
    pub duration: String,
    pub caller_id: String,
    pub connected_line: String,
}

impl From<&Channel> for ActiveCall {
    fn from(channel: &Channel) -> Self {
        Self {
            id: channel.id.clone(),
            extension: channel.extension.clone(),
            state: channel.state.clone(),
            duration: channel.duration.clone(),
            caller_id: channel.caller_id.clone(),
            connected_line: channel.connected_line.clone(),
        }
    }
}

/// `PJSIP/1001-00000001` -> `1001`; empty without a `/`
pub fn extract_extension(channel: &str) -> &str {
    match channel.split('/').nth(1) {
        Some(tail) => tail.split('-').next().unwrap_or(""),
        None => "",
    }
}

fn event_is(record: &Record, name: &str) -> bool {
    record
        .event()
        .map(|e| e.eq_ignore_ascii_case(name))
        .unwrap_or(false)
}

/// Channels keyed by id, in id order
pub fn parse_channels(records: &[Record]) -> BTreeMap<String, Channel> {
    records
        .iter()
        .filter(|r| event_is(r, "CoreShowChannel"))
        .filter_map(|r| {
            let id = r.get_or_empty("Channel");
            if id.is_empty() {
                return None;
            }
            let channel = Channel {
                id: id.to_string(),
                extension: extract_extension(id).to_string(),
                state: r.get_or_empty("ChannelStateDesc").to_string(),
                caller_id: r.get_or_empty("CallerIDNum").to_string(),
                connected_line: r.get_or_empty("ConnectedLineNum").to_string(),
                duration: r.get_or_empty("Duration").to_string(),
                unique_id: r.get_or_empty("Uniqueid").to_string(),
                application: r.get_or_empty("Application").to_string(),
            };
            Some((channel.id.clone(), channel))
        })
        .collect()
}

/// Bridges keyed by id.
///
/// Accepts the concatenation of a `BridgeList` reply and the `BridgeInfo`
/// replies for its bridges. Members come from `BridgeInfoChannel` records and
/// from an optional comma separated `Channels` field.
pub fn parse_bridges(records: &[Record]) -> BTreeMap<String, Bridge> {
    let mut bridges: BTreeMap<String, Bridge> = BTreeMap::new();

    for record in records {
        let id = record.get_or_empty("BridgeUniqueid");
        if id.is_empty() {
            continue;
        }
        if event_is(record, "BridgeListItem") || event_is(record, "BridgeInfoComplete") {
            let bridge = bridges.entry(id.to_string()).or_insert_with(|| Bridge {
                id: id.to_string(),
                ..Default::default()
            });
            if bridge.technology.is_empty() {
                bridge.technology = record.get_or_empty("BridgeTechnology").to_string();
            }
            if bridge.bridge_type.is_empty() {
                bridge.bridge_type = record.get_or_empty("BridgeType").to_string();
            }
            if let Some(list) = record.get("Channels") {
                for member in list.split(',').map(str::trim).filter(|m| !m.is_empty()) {
                    push_member(bridge, member);
                }
            }
        } else if event_is(record, "BridgeInfoChannel") {
            let member = record.get_or_empty("Channel");
            let bridge = bridges.entry(id.to_string()).or_insert_with(|| Bridge {
                id: id.to_string(),
                ..Default::default()
            });
            if !member.is_empty() {
                push_member(bridge, member);
            }
        }
    }
    bridges
}

fn push_member(bridge: &mut Bridge, member: &str) {
    if !bridge.channels.iter().any(|c| c == member) {
        bridge.channels.push(member.to_string());
    }
}

/// Channels whose id appears in no bridge's member set
pub fn project_active_calls(
    channels: &BTreeMap<String, Channel>,
    bridges: &BTreeMap<String, Bridge>,
) -> Vec<ActiveCall> {
    let bridged: HashSet<&str> = bridges
        .values()
        .flat_map(|b| b.channels.iter().map(String::as_str))
        .collect();
    channels
        .values()
        .filter(|c| !bridged.contains(c.id.as_str()))
        .map(ActiveCall::from)
        .collect()
}

/// Parse both replies and project the unbridged channels
pub fn parse_active_calls(channel_records: &[Record], bridge_records: &[Record]) -> Vec<ActiveCall> {
    project_active_calls(&parse_channels(channel_records), &parse_bridges(bridge_records))
}
