//! Command-line definitions

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use ispbx_pbx_core::{EndpointUpdate, NewEndpoint};

#[derive(Parser, Debug)]
#[command(name = "ispbx", author, version, about = "Administer an Asterisk PBX over the manager interface", long_about = None)]
pub struct Cli {
    /// Configuration file; missing files are ignored
    #[arg(short, long, global = true, env = "ISPBX_CONFIG", default_value = "ispbx.toml")]
    pub config: PathBuf,

    /// Log level (overrides the configuration file)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print notifications as JSON lines until interrupted
    Watch {
        /// Only these event types (repeatable); all events when omitted
        #[arg(short, long = "event")]
        events: Vec<String>,
    },

    /// Endpoint administration
    #[command(subcommand)]
    Endpoint(EndpointCommand),

    /// Channels that are not bridged to another channel
    Calls {
        /// List every channel instead
        #[arg(long)]
        all_channels: bool,
    },

    /// Hang up a channel
    Hangup { channel: String },

    /// Queue administration
    #[command(subcommand)]
    Queue(QueueCommand),
}

#[derive(Subcommand, Debug)]
pub enum EndpointCommand {
    /// Show one endpoint, or list all of them
    Show { id: Option<String> },

    /// Create an endpoint with its auth and aor sections
    Create(CreateArgs),

    /// Change fields of an existing endpoint
    Update(UpdateArgs),

    /// Remove an endpoint, its sections and dialplan entries
    Delete { id: String },

    /// Dialplan hint state of the endpoint's extension
    State { id: String },

    /// Re-read configuration and registration into the state cache
    Refresh { id: String },
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    pub id: String,

    #[arg(long)]
    pub password: String,

    /// Display name for the caller id
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub context: Option<String>,

    #[arg(long)]
    pub transport: Option<String>,

    /// Comma separated codec list, e.g. `ulaw,alaw`
    #[arg(long)]
    pub codecs: Option<String>,

    #[arg(long)]
    pub max_contacts: Option<u32>,
}

impl From<CreateArgs> for NewEndpoint {
    fn from(args: CreateArgs) -> Self {
        NewEndpoint {
            id: args.id,
            password: args.password,
            name: args.name,
            context: args.context,
            transport: args.transport,
            codecs: args.codecs,
            max_contacts: args.max_contacts,
        }
    }
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub id: String,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub context: Option<String>,

    #[arg(long)]
    pub transport: Option<String>,

    /// `yes` or `no`
    #[arg(long)]
    pub direct_media: Option<String>,

    #[arg(long)]
    pub codecs: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    #[arg(long)]
    pub max_contacts: Option<u32>,

    /// Seconds between OPTIONS probes
    #[arg(long)]
    pub qualify_frequency: Option<u32>,

    #[arg(long)]
    pub qualify_timeout: Option<u32>,
}

impl UpdateArgs {
    pub fn changes(&self) -> EndpointUpdate {
        EndpointUpdate {
            name: self.name.clone(),
            context: self.context.clone(),
            transport: self.transport.clone(),
            direct_media: self.direct_media.clone(),
            codecs: self.codecs.clone(),
            password: self.password.clone(),
            max_contacts: self.max_contacts,
            qualify_frequency: self.qualify_frequency,
            qualify_timeout: self.qualify_timeout,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum QueueCommand {
    /// Members, callers and parameters of one queue or all queues
    Status { name: Option<String> },

    /// Reload queue members, rules and parameters
    Reload { name: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["ispbx", "calls", "--log-level", "debug", "--json-logs"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.json_logs);
        assert_eq!(cli.config, PathBuf::from("ispbx.toml"));
        assert!(matches!(cli.command, Command::Calls { all_channels: false }));
    }

    #[test]
    fn create_requires_password() {
        assert!(Cli::try_parse_from(["ispbx", "endpoint", "create", "1001"]).is_err());

        let cli = Cli::try_parse_from([
            "ispbx", "endpoint", "create", "1001", "--password", "pw", "--name", "Alice", "--max-contacts", "2",
        ])
        .unwrap();
        let Command::Endpoint(EndpointCommand::Create(args)) = cli.command else {
            panic!("wrong command");
        };
        let endpoint = NewEndpoint::from(args);
        assert_eq!(endpoint.id, "1001");
        assert_eq!(endpoint.password, "pw");
        assert_eq!(endpoint.name.as_deref(), Some("Alice"));
        assert_eq!(endpoint.max_contacts, Some(2));
        assert!(endpoint.context.is_none());
    }

    #[test]
    fn update_without_flags_is_empty() {
        let cli = Cli::try_parse_from(["ispbx", "endpoint", "update", "1001"]).unwrap();
        let Command::Endpoint(EndpointCommand::Update(args)) = cli.command else {
            panic!("wrong command");
        };
        assert!(args.changes().is_empty());

        let cli = Cli::try_parse_from(["ispbx", "endpoint", "update", "1001", "--qualify-timeout", "3"]).unwrap();
        let Command::Endpoint(EndpointCommand::Update(args)) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(args.changes().qualify_timeout, Some(3));
    }

    #[test]
    fn repeated_event_filters() {
        let cli = Cli::try_parse_from(["ispbx", "watch", "-e", "Newchannel", "--event", "Hangup"]).unwrap();
        let Command::Watch { events } = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(events, vec!["Newchannel", "Hangup"]);
    }

    #[test]
    fn optional_queue_name() {
        let cli = Cli::try_parse_from(["ispbx", "queue", "status"]).unwrap();
        assert!(matches!(cli.command, Command::Queue(QueueCommand::Status { name: None })));
    }
}
