//! `QueueStatus` replies

use ispbx_ami_core::Record;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueMember {
    pub name: String,
    pub interface: String,
    pub state_interface: String,
    pub membership: String,
    pub penalty: String,
    pub calls_taken: String,
    pub last_call: String,
    pub in_call: bool,
    pub status: String,
    pub paused: bool,
    pub paused_reason: String,
}

/// A caller waiting in a queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub position: String,
    pub channel: String,
    pub unique_id: String,
    pub caller_id_num: String,
    pub caller_id_name: String,
    pub wait: String,
}

/// One queue with its members and waiting callers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub name: String,
    pub strategy: String,
    pub calls: String,
    pub max: String,
    pub hold_time: String,
    pub talk_time: String,
    pub completed: String,
    pub abandoned: String,
    pub service_level: String,
    pub service_level_perf: String,
    pub weight: String,
    pub members: Vec<QueueMember>,
    pub entries: Vec<QueueEntry>,
}

impl QueueSummary {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

fn summary_for<'a>(queues: &'a mut Vec<QueueSummary>, name: &str) -> &'a mut QueueSummary {
    let index = match queues.iter().position(|q| q.name == name) {
        Some(index) => index,
        None => {
            queues.push(QueueSummary::named(name));
            queues.len() - 1
        }
    };
    &mut queues[index]
}

/// Queues in the order they first appear in the reply.
///
/// Member and entry records for a queue with no `QueueParams` record get a
/// summary created on demand. Records without a `Queue` field are skipped.
pub fn parse_queue_status(records: &[Record]) -> Vec<QueueSummary> {
    let mut queues: Vec<QueueSummary> = Vec::new();

    for record in records {
        let Some(kind) = record.event() else {
            continue;
        };
        let name = record.get_or_empty("Queue");
        if name.is_empty() {
            continue;
        }
        match kind {
            "QueueParams" => {
                let queue = summary_for(&mut queues, name);
                queue.strategy = record.get_or_empty("Strategy").to_string();
                queue.calls = record.get_or("Calls", "0").to_string();
                queue.max = record.get_or("Max", "0").to_string();
                queue.hold_time = record.get_or("Holdtime", "0").to_string();
                queue.talk_time = record.get_or("TalkTime", "0").to_string();
                queue.completed = record.get_or("Completed", "0").to_string();
                queue.abandoned = record.get_or("Abandoned", "0").to_string();
                queue.service_level = record.get_or("ServiceLevel", "0").to_string();
                queue.service_level_perf = record.get_or("ServiceLevelPerf", "0").to_string();
                queue.weight = record.get_or("Weight", "0").to_string();
            }
            "QueueMember" => {
                let interface = match record.get_or_empty("Interface") {
                    "" => record.get_or_empty("Location"),
                    value => value,
                };
                let member = QueueMember {
                    name: record.get_or_empty("Name").to_string(),
                    interface: interface.to_string(),
                    state_interface: record.get_or_empty("StateInterface").to_string(),
                    membership: record.get_or_empty("Membership").to_string(),
                    penalty: record.get_or("Penalty", "0").to_string(),
                    calls_taken: record.get_or("CallsTaken", "0").to_string(),
                    last_call: record.get_or("LastCall", "0").to_string(),
                    in_call: record.get_or_empty("InCall") == "1",
                    status: record.get_or_empty("Status").to_string(),
                    paused: record.get_or_empty("Paused") == "1",
                    paused_reason: record.get_or_empty("PausedReason").to_string(),
                };
                summary_for(&mut queues, name).members.push(member);
            }
            "QueueEntry" => {
                let entry = QueueEntry {
                    position: record.get_or_empty("Position").to_string(),
                    channel: record.get_or_empty("Channel").to_string(),
                    unique_id: record.get_or_empty("Uniqueid").to_string(),
                    caller_id_num: record.get_or_empty("CallerIDNum").to_string(),
                    caller_id_name: record.get_or_empty("CallerIDName").to_string(),
                    wait: record.get_or("Wait", "0").to_string(),
                };
                summary_for(&mut queues, name).entries.push(entry);
            }
            _ => {}
        }
    }
    queues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pairs: &[(&str, &str)]) -> Record {
        Record::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn members_and_entries_attach_to_their_queue() {
        let records = vec![
            rec(&[("Response", "Success"), ("EventList", "start")]),
            rec(&[("Event", "QueueParams"), ("Queue", "support"), ("Strategy", "ringall"), ("Calls", "1")]),
            rec(&[("Event", "QueueParams"), ("Queue", "sales"), ("Strategy", "leastrecent")]),
            rec(&[
                ("Event", "QueueMember"),
                ("Queue", "support"),
                ("Name", "Alice"),
                ("Location", "PJSIP/1001"),
                ("Paused", "1"),
                ("PausedReason", "lunch"),
            ]),
            rec(&[("Event", "QueueEntry"), ("Queue", "support"), ("Position", "1"), ("Channel", "PJSIP/2001-00000001"), ("Wait", "42")]),
            rec(&[("Event", "QueueStatusComplete"), ("EventList", "Complete")]),
        ];
        let queues = parse_queue_status(&records);
        assert_eq!(queues.len(), 2);
        assert_eq!(queues[0].name, "support");
        assert_eq!(queues[0].calls, "1");
        assert_eq!(queues[0].max, "0");
        assert_eq!(queues[0].members.len(), 1);
        assert_eq!(queues[0].members[0].interface, "PJSIP/1001");
        assert!(queues[0].members[0].paused);
        assert!(!queues[0].members[0].in_call);
        assert_eq!(queues[0].entries[0].wait, "42");
        assert!(queues[1].members.is_empty());
    }

    #[test]
    fn member_of_unknown_queue_creates_summary() {
        let records = vec![rec(&[("Event", "QueueMember"), ("Queue", "overflow"), ("Interface", "PJSIP/1005")])];
        let queues = parse_queue_status(&records);
        assert_eq!(queues.len(), 1);
        assert_eq!(queues[0].name, "overflow");
        assert_eq!(queues[0].strategy, "");
        assert_eq!(queues[0].members[0].interface, "PJSIP/1005");
    }
}
