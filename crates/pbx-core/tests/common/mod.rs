//! In-memory switch for exercising the managers without a socket.
//!
//! Keeps configuration files as ordered sections, applies `UpdateConfig`
//! sub-operations with the same category addressing the transaction
//! manager relies on, logs every action and can be told to fail the next
//! action matching a predicate.

#![allow(dead_code)]

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use ispbx_ami_core::{Action, ActionSubmitter, AmiError, AmiResult, ConfigOp, ConfigVerb, Record, Reply};

#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub fields: Vec<(String, String)>,
}

impl Section {
    pub fn new(name: &str, fields: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    pub fn get(&self, variable: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(variable))
            .map(|(_, v)| v.as_str())
    }

    fn matches_filter(&self, filter: Option<&str>) -> bool {
        let Some(filter) = filter.filter(|f| !f.is_empty()) else {
            return true;
        };
        filter.split(',').all(|pair| match pair.split_once('=') {
            Some((k, v)) => self.get(k.trim()) == Some(v.trim()),
            None => false,
        })
    }
}

type Predicate = Box<dyn Fn(&Action) -> bool + Send + Sync>;

struct Fault {
    predicate: Predicate,
    message: String,
}

#[derive(Default)]
struct State {
    files: HashMap<String, Vec<Section>>,
    log: Vec<Action>,
    reloads: Vec<String>,
    faults: Vec<Fault>,
    canned: HashMap<String, Vec<Vec<Record>>>,
}

#[derive(Default)]
pub struct FakePbx {
    state: Mutex<State>,
}

fn response(ok: bool, message: &str) -> Record {
    Record::from_pairs([("Response", if ok { "Success" } else { "Error" }), ("Message", message)])
}

fn error_reply(message: &str) -> Reply {
    Reply::new(vec![response(false, message)])
}

fn success_reply(message: &str) -> Reply {
    Reply::new(vec![response(true, message)])
}

pub fn rec(pairs: &[(&str, &str)]) -> Record {
    Record::from_pairs(pairs.iter().copied())
}

impl FakePbx {
    pub fn new() -> Self {
        let pbx = Self::default();
        pbx.set_file("pjsip.conf", vec![Section::new("transport-udp", &[("type", "transport"), ("protocol", "udp")])]);
        pbx
    }

    pub fn set_file(&self, name: &str, sections: Vec<Section>) {
        self.state.lock().files.insert(name.to_string(), sections);
    }

    pub fn remove_file(&self, name: &str) {
        self.state.lock().files.remove(name);
    }

    pub fn file(&self, name: &str) -> Vec<Section> {
        self.state.lock().files.get(name).cloned().unwrap_or_default()
    }

    /// Sections of pjsip.conf named `id`
    pub fn sections_named(&self, id: &str) -> Vec<Section> {
        self.file("pjsip.conf").into_iter().filter(|s| s.name == id).collect()
    }

    pub fn section_of_type(&self, id: &str, kind: &str) -> Option<Section> {
        self.sections_named(id).into_iter().find(|s| s.get("type") == Some(kind))
    }

    /// Fail the next action matching `predicate` with `message`
    pub fn fail_next<F>(&self, predicate: F, message: &str)
    where
        F: Fn(&Action) -> bool + Send + Sync + 'static,
    {
        self.state.lock().faults.push(Fault {
            predicate: Box::new(predicate),
            message: message.to_string(),
        });
    }

    /// Queue a reply for the next action named `action`
    pub fn reply_to(&self, action: &str, records: Vec<Record>) {
        self.state
            .lock()
            .canned
            .entry(action.to_ascii_lowercase())
            .or_default()
            .push(records);
    }

    pub fn log(&self) -> Vec<Action> {
        self.state.lock().log.clone()
    }

    pub fn actions_named(&self, name: &str) -> Vec<Action> {
        self.log().into_iter().filter(|a| a.name() == name).collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Modules reloaded, through `Reload` or an `UpdateConfig` reload
    pub fn reloads(&self) -> Vec<String> {
        self.state.lock().reloads.clone()
    }

    fn handle(&self, action: &Action) -> Reply {
        let mut state = self.state.lock();
        state.log.push(action.clone());

        if let Some(pos) = state.faults.iter().position(|f| (f.predicate)(action)) {
            let fault = state.faults.remove(pos);
            return error_reply(&fault.message);
        }

        match action.name() {
            "GetConfig" => get_config(&state, action.get_param("Filename").unwrap_or("")),
            "UpdateConfig" => update_config(&mut state, action),
            "Reload" => {
                let module = action.get_param("Module").unwrap_or("all").to_string();
                state.reloads.push(module);
                success_reply("Module Reloaded")
            }
            "PJSIPShowEndpoint" => show_endpoint(&state, action.get_param("Endpoint").unwrap_or("")),
            "PJSIPShowEndpoints" => show_endpoints(&state),
            name => {
                let canned = state
                    .canned
                    .get_mut(&name.to_ascii_lowercase())
                    .filter(|q| !q.is_empty())
                    .map(|q| q.remove(0));
                match canned {
                    Some(records) => Reply::new(records),
                    None => error_reply("Invalid/unknown command"),
                }
            }
        }
    }
}

#[async_trait]
impl ActionSubmitter for FakePbx {
    async fn submit(&self, action: Action) -> AmiResult<Reply> {
        Ok(self.handle(&action))
    }
}

/// Submitter whose link is always down
pub struct DeadLink;

#[async_trait]
impl ActionSubmitter for DeadLink {
    async fn submit(&self, _action: Action) -> AmiResult<Reply> {
        Err(AmiError::link_down("not connected"))
    }
}

fn get_config(state: &State, filename: &str) -> Reply {
    let Some(sections) = state.files.get(filename) else {
        return error_reply("Config file not found");
    };
    let mut record = response(true, "");
    for (i, section) in sections.iter().enumerate() {
        record.push(format!("Category-{:06}", i), section.name.as_str());
        for (j, (k, v)) in section.fields.iter().enumerate() {
            record.push(format!("Line-{:06}-{:06}", i, j), format!("{}={}", k, v));
        }
    }
    Reply::new(vec![record])
}

fn update_config(state: &mut State, action: &Action) -> Reply {
    let filename = action.get_param("SrcFilename").unwrap_or("").to_string();
    let mut sections = state.files.get(&filename).cloned().unwrap_or_default();

    for op in action.config_ops() {
        if let Err(message) = apply_op(&mut sections, op) {
            return error_reply(message);
        }
    }
    state.files.insert(filename, sections);

    let reload = action.get_param("Reload").unwrap_or("no");
    if !reload.eq_ignore_ascii_case("no") {
        state.reloads.push(reload.to_string());
    }
    success_reply("")
}

fn target<'a>(sections: &'a mut [Section], op: &ConfigOp) -> Option<&'a mut Section> {
    sections
        .iter_mut()
        .find(|s| s.name == op.category && s.matches_filter(op.match_filter.as_deref()))
}

fn apply_op(sections: &mut Vec<Section>, op: &ConfigOp) -> Result<(), &'static str> {
    let variable = op.variable.clone().unwrap_or_default();
    let value = op.value.clone().unwrap_or_default();
    match op.verb {
        ConfigVerb::NewCat => {
            let allow_dups = op.options.as_deref().map(|o| o.contains("allowdups")).unwrap_or(false);
            if !allow_dups && sections.iter().any(|s| s.name == op.category) {
                return Err("Category already exists");
            }
            let section = Section::new(&op.category, &[]);
            let before = op
                .match_filter
                .as_deref()
                .and_then(|m| sections.iter().position(|s| s.name == m));
            match before {
                Some(pos) => sections.insert(pos, section),
                None => sections.push(section),
            }
        }
        ConfigVerb::Append => {
            let section = target(sections, op).ok_or("Given category does not exist")?;
            section.fields.push((variable, value));
        }
        ConfigVerb::Update => {
            let section = target(sections, op).ok_or("Given category does not exist")?;
            let line = section
                .fields
                .iter_mut()
                .find(|(k, _)| k.eq_ignore_ascii_case(&variable))
                .ok_or("Update did not complete successfully")?;
            line.1 = value;
        }
        ConfigVerb::Delete => {
            let section = sections
                .iter_mut()
                .find(|s| s.name == op.category)
                .ok_or("Given category does not exist")?;
            let before = section.fields.len();
            section.fields.retain(|(k, v)| {
                !(k.eq_ignore_ascii_case(&variable) && op.match_filter.as_deref().map(|m| m == v).unwrap_or(true))
            });
            if section.fields.len() == before {
                return Err("Delete did not complete successfully");
            }
        }
        ConfigVerb::DelCat => {
            let pos = sections
                .iter()
                .position(|s| s.name == op.category && s.matches_filter(op.match_filter.as_deref()))
                .ok_or("Given category does not exist")?;
            sections.remove(pos);
        }
        _ => return Err("Unsupported action"),
    }
    Ok(())
}

fn find_typed<'a>(sections: &'a [Section], name: &str, kind: &str) -> Option<&'a Section> {
    sections.iter().find(|s| s.name == name && s.get("type") == Some(kind))
}

fn show_endpoint(state: &State, id: &str) -> Reply {
    let sections = state.files.get("pjsip.conf").cloned().unwrap_or_default();
    let Some(endpoint) = find_typed(&sections, id, "endpoint") else {
        return error_reply(&format!("Unable to retrieve endpoint {}", id));
    };
    let field = |name: &str| endpoint.get(name).unwrap_or("").to_string();

    let mut records = vec![Record::from_pairs([
        ("Response", "Success"),
        ("EventList", "start"),
        ("Message", "Following are Events for each object associated with the Endpoint"),
    ])];
    records.push(Record::from_pairs([
        ("Event", "EndpointDetail".to_string()),
        ("ObjectType", "endpoint".to_string()),
        ("ObjectName", id.to_string()),
        ("Context", field("context")),
        ("Allow", format!("({})", field("allow").replace(',', "|"))),
        ("Transport", field("transport")),
        ("DirectMedia", field("direct_media")),
        ("Aors", field("aors")),
        ("Auth", field("auth")),
        ("Callerid", field("callerid")),
        ("DeviceState", "Unavailable".to_string()),
    ]));
    if let Some(auth) = find_typed(&sections, &field("auth"), "auth") {
        records.push(Record::from_pairs([
            ("Event", "AuthDetail"),
            ("ObjectName", auth.name.as_str()),
            ("Username", auth.get("username").unwrap_or("")),
            ("Password", auth.get("password").unwrap_or("")),
            ("AuthType", auth.get("auth_type").unwrap_or("")),
        ]));
    }
    if let Some(aor) = find_typed(&sections, &field("aors"), "aor") {
        records.push(Record::from_pairs([
            ("Event", "AorDetail"),
            ("ObjectName", aor.name.as_str()),
            ("MaxContacts", aor.get("max_contacts").unwrap_or("")),
            ("QualifyFrequency", aor.get("qualify_frequency").unwrap_or("")),
            ("QualifyTimeout", aor.get("qualify_timeout").unwrap_or("")),
        ]));
    }
    let count = (records.len() - 1).to_string();
    records.push(Record::from_pairs([
        ("Event", "EndpointDetailComplete"),
        ("EventList", "Complete"),
        ("ListItems", count.as_str()),
    ]));
    Reply::new(records)
}

fn show_endpoints(state: &State) -> Reply {
    let sections = state.files.get("pjsip.conf").cloned().unwrap_or_default();
    let endpoints: Vec<&Section> = sections.iter().filter(|s| s.get("type") == Some("endpoint")).collect();
    if endpoints.is_empty() {
        return error_reply("No endpoints found");
    }
    let mut records = vec![Record::from_pairs([("Response", "Success"), ("EventList", "start")])];
    for endpoint in &endpoints {
        records.push(Record::from_pairs([
            ("Event", "EndpointList"),
            ("ObjectName", endpoint.name.as_str()),
            ("Aor", endpoint.get("aors").unwrap_or("")),
            ("Auths", endpoint.get("auth").unwrap_or("")),
            ("DeviceState", "Unavailable"),
        ]));
    }
    let count = endpoints.len().to_string();
    records.push(Record::from_pairs([
        ("Event", "EndpointListComplete"),
        ("EventList", "Complete"),
        ("ListItems", count.as_str()),
    ]));
    Reply::new(records)
}

/// Predicate: an `UpdateConfig` creating or appending a section of `kind`
pub fn creates_section(kind: &'static str) -> impl Fn(&Action) -> bool + Send + Sync + 'static {
    move |action: &Action| {
        action.name() == "UpdateConfig"
            && action
                .config_ops()
                .iter()
                .any(|op| op.verb == ConfigVerb::Append && op.variable.as_deref() == Some("type") && op.value.as_deref() == Some(kind))
    }
}

/// Predicate: a `DelCat` of the section of `kind`
pub fn deletes_section(kind: &'static str) -> impl Fn(&Action) -> bool + Send + Sync + 'static {
    let filter = format!("type={}", kind);
    move |action: &Action| {
        action
            .config_ops()
            .iter()
            .any(|op| op.verb == ConfigVerb::DelCat && op.match_filter.as_deref() == Some(filter.as_str()))
    }
}
