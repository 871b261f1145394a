//! Outbound actions
//!
//! An [`Action`] is a verb plus named parameters. `UpdateConfig` style actions
//! additionally carry an ordered list of [`ConfigOp`]s that the codec numbers
//! `Action-000000`, `Cat-000000`, ... in submission order.

use std::fmt;

/// Sub-verbs understood by `UpdateConfig`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigVerb {
    NewCat,
    RenameCat,
    DelCat,
    EmptyCat,
    Update,
    Delete,
    Append,
    Insert,
}

impl ConfigVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigVerb::NewCat => "NewCat",
            ConfigVerb::RenameCat => "RenameCat",
            ConfigVerb::DelCat => "DelCat",
            ConfigVerb::EmptyCat => "EmptyCat",
            ConfigVerb::Update => "Update",
            ConfigVerb::Delete => "Delete",
            ConfigVerb::Append => "Append",
            ConfigVerb::Insert => "Insert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let verb = match s.to_ascii_lowercase().as_str() {
            "newcat" => ConfigVerb::NewCat,
            "renamecat" => ConfigVerb::RenameCat,
            "delcat" => ConfigVerb::DelCat,
            "emptycat" => ConfigVerb::EmptyCat,
            "update" => ConfigVerb::Update,
            "delete" => ConfigVerb::Delete,
            "append" => ConfigVerb::Append,
            "insert" => ConfigVerb::Insert,
            _ => return None,
        };
        Some(verb)
    }
}

impl fmt::Display for ConfigVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One numbered sub-operation of a batched configuration edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOp {
    pub verb: ConfigVerb,
    pub category: String,
    pub variable: Option<String>,
    pub value: Option<String>,
    /// Extra match criterion (`Match-NNNNNN`)
    pub match_filter: Option<String>,
    /// Comma separated options (`Options-NNNNNN`)
    pub options: Option<String>,
}

impl ConfigOp {
    pub fn new(verb: ConfigVerb, category: impl Into<String>) -> Self {
        Self {
            verb,
            category: category.into(),
            variable: None,
            value: None,
            match_filter: None,
            options: None,
        }
    }

    pub fn new_category(category: impl Into<String>) -> Self {
        Self::new(ConfigVerb::NewCat, category)
    }

    pub fn delete_category(category: impl Into<String>) -> Self {
        Self::new(ConfigVerb::DelCat, category)
    }

    pub fn append(category: impl Into<String>, variable: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(ConfigVerb::Append, category).with_var(variable, value)
    }

    pub fn update(category: impl Into<String>, variable: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(ConfigVerb::Update, category).with_var(variable, value)
    }

    pub fn delete(category: impl Into<String>, variable: impl Into<String>) -> Self {
        let mut op = Self::new(ConfigVerb::Delete, category);
        op.variable = Some(variable.into());
        op
    }

    pub fn with_var(mut self, variable: impl Into<String>, value: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self.value = Some(value.into());
        self
    }

    pub fn with_match(mut self, filter: impl Into<String>) -> Self {
        self.match_filter = Some(filter.into());
        self
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }
}

/// A request sent to the switch.
///
/// Parameter keys are unique; setting an existing key replaces its value.
/// The correlation token is not part of the action: the connection stamps
/// it when the action is written.
///
/// # Examples
///
/// ```rust
/// use ispbx_ami_core::{Action, ConfigOp, ConfigVerb};
///
/// let action = Action::update_config("pjsip.conf", "no")
///     .op(ConfigOp::append("1001", "context", "office").with_match("type=endpoint"));
/// assert_eq!(action.get_param("srcfilename"), Some("pjsip.conf"));
/// assert_eq!(action.config_ops()[0].verb, ConfigVerb::Append);
///
/// // Later values replace earlier ones, keys compare case-insensitively
/// let status = Action::new("QueueStatus").param("Queue", "sales").param("queue", "support");
/// assert_eq!(status.get_param("Queue"), Some("support"));
/// assert_eq!(status.params().count(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    name: String,
    params: Vec<(String, String)>,
    config_ops: Vec<ConfigOp>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            config_ops: Vec::new(),
        }
    }

    /// Builder-style parameter setter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_param(key, value);
        self
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            Some((_, v)) => *v = value,
            None => self.params.push((key, value)),
        }
    }

    /// Builder-style sub-operation
    pub fn op(mut self, op: ConfigOp) -> Self {
        self.config_ops.push(op);
        self
    }

    pub fn push_op(&mut self, op: ConfigOp) {
        self.config_ops.push(op);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn config_ops(&self) -> &[ConfigOp] {
        &self.config_ops
    }

    // Common actions

    pub fn ping() -> Self {
        Self::new("Ping")
    }

    pub fn login(username: &str, secret: &str) -> Self {
        Self::new("Login")
            .param("Username", username)
            .param("Secret", secret)
            .param("Events", "on")
    }

    pub fn logoff() -> Self {
        Self::new("Logoff")
    }

    pub fn get_config(filename: &str) -> Self {
        Self::new("GetConfig").param("Filename", filename)
    }

    /// `UpdateConfig` editing `filename` in place. `reload` is `"no"`,
    /// `"yes"` or a module name.
    pub fn update_config(filename: &str, reload: &str) -> Self {
        Self::new("UpdateConfig")
            .param("SrcFilename", filename)
            .param("DstFilename", filename)
            .param("Reload", reload)
    }

    pub fn reload_module(module: &str) -> Self {
        Self::new("Reload").param("Module", module)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.config_ops.is_empty() {
            write!(f, " ({} ops)", self.config_ops.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_are_unique() {
        let action = Action::new("PJSIPShowEndpoint")
            .param("Endpoint", "1001")
            .param("endpoint", "1002");
        assert_eq!(action.params().count(), 1);
        assert_eq!(action.get_param("Endpoint"), Some("1002"));
    }

    #[test]
    fn update_config_builder() {
        let action = Action::update_config("pjsip.conf", "no")
            .op(ConfigOp::new_category("1001").with_options("allowdups"))
            .op(ConfigOp::append("1001", "type", "endpoint"));
        assert_eq!(action.name(), "UpdateConfig");
        assert_eq!(action.get_param("Reload"), Some("no"));
        assert_eq!(action.config_ops().len(), 2);
        assert_eq!(action.to_string(), "UpdateConfig (2 ops)");
        assert_eq!(ConfigVerb::parse("delcat"), Some(ConfigVerb::DelCat));
    }
}
