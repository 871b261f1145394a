//! Switch-side naming and defaults used by the managers

use serde::{Deserialize, Serialize};

use ispbx_ami_core::{AmiError, AmiResult};

/// Files, module names and endpoint defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PbxConfig {
    /// PJSIP configuration file edited by endpoint operations
    pub pjsip_file: String,
    /// Dialplan file scanned on endpoint deletion
    pub dialplan_file: String,
    /// Module reloaded after the last configuration step
    pub pjsip_module: String,
    pub defaults: EndpointDefaults,
}

impl Default for PbxConfig {
    fn default() -> Self {
        Self {
            pjsip_file: "pjsip.conf".to_string(),
            dialplan_file: "extensions.conf".to_string(),
            pjsip_module: "res_pjsip.so".to_string(),
            defaults: EndpointDefaults::default(),
        }
    }
}

impl PbxConfig {
    pub fn validate(&self) -> AmiResult<()> {
        for (name, value) in [
            ("pjsip_file", &self.pjsip_file),
            ("dialplan_file", &self.dialplan_file),
            ("pjsip_module", &self.pjsip_module),
        ] {
            if value.trim().is_empty() {
                return Err(AmiError::config(format!("{} must not be empty", name)));
            }
        }
        if self.defaults.max_contacts == 0 {
            return Err(AmiError::config("defaults.max_contacts must be at least 1"));
        }
        Ok(())
    }
}

/// Values applied to fields a create request leaves out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointDefaults {
    pub context: String,
    pub transport: String,
    pub codecs: String,
    pub direct_media: String,
    pub max_contacts: u32,
    pub qualify_frequency: u32,
}

impl Default for EndpointDefaults {
    fn default() -> Self {
        Self {
            context: "from-internal".to_string(),
            transport: "transport-udp".to_string(),
            codecs: "ulaw,alaw".to_string(),
            direct_media: "no".to_string(),
            max_contacts: 1,
            qualify_frequency: 60,
        }
    }
}
