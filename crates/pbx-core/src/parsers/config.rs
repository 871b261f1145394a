//! Typed view of `GetConfig` replies

use std::fmt;

use ispbx_ami_core::Record;
use serde::Serialize;

/// Declared `type=` of a configuration section
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Endpoint,
    Auth,
    Aor,
    Other(String),
    /// No `type` line in the section
    Untyped,
}

impl SectionKind {
    pub fn from_type(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "endpoint" => Self::Endpoint,
            "auth" => Self::Auth,
            "aor" => Self::Aor,
            "" => Self::Untyped,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Endpoint => "endpoint",
            Self::Auth => "auth",
            Self::Aor => "aor",
            Self::Other(name) => name,
            Self::Untyped => "",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One category of a configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSection {
    pub name: String,
    pub kind: SectionKind,
    /// `var=value` lines in file order; repeated variables are kept
    pub fields: Vec<(String, String)>,
}

impl ConfigSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SectionKind::Untyped,
            fields: Vec::new(),
        }
    }

    /// First value of `variable`
    pub fn get(&self, variable: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(variable))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, variable: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(variable))
            .map(|(_, v)| v.as_str())
    }

    pub fn is(&self, kind: &SectionKind) -> bool {
        &self.kind == kind
    }
}

/// Parse the numeric index out of `Category-000003` or `Line-000003-000001`
fn category_index(key: &str, prefix: &str) -> Option<usize> {
    let rest = key.get(..prefix.len()).filter(|p| p.eq_ignore_ascii_case(prefix))?;
    let digits = &key[rest.len()..];
    let digits = digits.split('-').next()?;
    digits.parse().ok()
}

/// Sections of a `GetConfig` reply, in file order.
///
/// Lines whose category index was never announced are dropped. A failure
/// reply yields no sections.
pub fn parse_config_sections(records: &[Record]) -> Vec<ConfigSection> {
    let mut sections: Vec<(usize, ConfigSection)> = Vec::new();

    for record in records.iter().filter(|r| !r.is_error()) {
        for (key, value) in record.iter() {
            if let Some(index) = category_index(key, "Category-") {
                sections.push((index, ConfigSection::new(value.trim())));
            } else if let Some(index) = category_index(key, "Line-") {
                let Some((_, section)) = sections.iter_mut().rev().find(|(i, _)| *i == index) else {
                    continue;
                };
                let (variable, val) = match value.split_once('=') {
                    Some((var, val)) => (var.trim(), val.trim()),
                    None => (value.trim(), ""),
                };
                if variable.eq_ignore_ascii_case("type") && section.kind == SectionKind::Untyped {
                    section.kind = SectionKind::from_type(val);
                }
                section.fields.push((variable.to_string(), val.to_string()));
            }
        }
    }
    sections.into_iter().map(|(_, s)| s).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_config_reply() -> Record {
        Record::from_pairs([
            ("Response", "Success"),
            ("Category-000000", "transport-udp"),
            ("Line-000000-000000", "type=transport"),
            ("Line-000000-000001", "protocol=udp"),
            ("Category-000001", "1001"),
            ("Line-000001-000000", "type=endpoint"),
            ("Line-000001-000001", "auth=1001"),
            ("Line-000001-000002", "allow=ulaw"),
            ("Line-000001-000003", "allow=alaw"),
            ("Category-000002", "1001"),
            ("Line-000002-000000", "type = auth"),
            ("Line-000002-000001", "password=a=b"),
            ("Category-000003", "general"),
            ("Line-000009-000000", "orphan=1"),
        ])
    }

    #[test]
    fn sections_in_file_order() {
        let sections = parse_config_sections(&[get_config_reply()]);
        assert_eq!(sections.len(), 4);
        assert_eq!(sections[0].kind, SectionKind::Other("transport".into()));
        assert_eq!(sections[1].name, "1001");
        assert!(sections[1].is(&SectionKind::Endpoint));
        assert_eq!(sections[1].get("auth"), Some("1001"));
        assert_eq!(sections[1].get_all("allow").collect::<Vec<_>>(), vec!["ulaw", "alaw"]);
        assert_eq!(sections[2].kind, SectionKind::Auth);
        assert_eq!(sections[2].get("password"), Some("a=b"));
        assert_eq!(sections[3].kind, SectionKind::Untyped);
        assert!(sections[3].fields.is_empty());
    }

    #[test]
    fn error_reply_has_no_sections() {
        let reply = Record::from_pairs([("Response", "Error"), ("Message", "Config file not found")]);
        assert!(parse_config_sections(&[reply]).is_empty());
    }
}
