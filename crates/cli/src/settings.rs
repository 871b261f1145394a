//! Process configuration: optional TOML file, then `ISPBX__...` environment
//! overrides (`ISPBX__AMI__HOST=10.0.0.2`).

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use ispbx_ami_core::AmiConfig;
use ispbx_pbx_core::PbxConfig;

use crate::logging::LoggingConfig;

pub const ENV_PREFIX: &str = "ISPBX";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ami: AmiConfig,
    pub pbx: PbxConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from `path` (skipped when the file does not exist) and the
    /// environment, then validate
    pub fn load(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("reading configuration from {}", path.display()))?;

        let app: AppConfig = settings.try_deserialize().context("invalid configuration")?;
        app.ami.validate()?;
        app.pbx.validate()?;
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    struct TempConfig(std::path::PathBuf);

    impl TempConfig {
        fn new(name: &str, contents: &str) -> Self {
            let path = std::env::temp_dir().join(format!("ispbx-{}-{}.toml", name, std::process::id()));
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(contents.as_bytes()).unwrap();
            Self(path)
        }
    }

    impl Drop for TempConfig {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn missing_file_gives_defaults() {
        let app = AppConfig::load(Path::new("/nonexistent/ispbx.toml")).unwrap();
        assert_eq!(app.ami.port, 5038);
        assert_eq!(app.pbx, PbxConfig::default());
        assert_eq!(app.logging.level, "info");
    }

    #[test]
    fn file_values_override_defaults() {
        let file = TempConfig::new(
            "override",
            r#"
[ami]
host = "pbx.example.net"
username = "ops"
secret = "hunter2"

[pbx.defaults]
context = "office"

[logging]
json = true
"#,
        );
        let app = AppConfig::load(&file.0).unwrap();
        assert_eq!(app.ami.host, "pbx.example.net");
        assert_eq!(app.ami.username, "ops");
        assert_eq!(app.ami.port, 5038);
        assert_eq!(app.pbx.defaults.context, "office");
        assert_eq!(app.pbx.defaults.max_contacts, 1);
        assert!(app.logging.json);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let file = TempConfig::new("invalid", "[ami]\nport = 0\n");
        assert!(AppConfig::load(&file.0).is_err());
    }
}
