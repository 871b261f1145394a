//! # ispbx-ami-core
//!
//! Client side of the Asterisk Manager Interface: a line-oriented wire codec,
//! a correlation engine multiplexing request/reply exchanges with
//! unsolicited notifications over one persistent connection, and an event
//! router fanning notifications out to independent consumers.
//!
//! ```rust,no_run
//! use ispbx_ami_core::{Action, AmiConfig, AmiConnection, EventRouter};
//!
//! # async fn demo() -> ispbx_ami_core::AmiResult<()> {
//! let router = EventRouter::new();
//! let connection = AmiConnection::new(AmiConfig::new("127.0.0.1", 5038), router);
//! connection.connect().await?;
//! let reply = connection
//!     .submit(Action::new("PJSIPShowEndpoint").param("Endpoint", "1001"))
//!     .await?;
//! println!("{} records", reply.records().len());
//! connection.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod record;
pub mod retry;

// Re-export main types
pub use action::{Action, ConfigOp, ConfigVerb};
pub use codec::{AmiCodec, Frame};
pub use config::{AmiConfig, ReconnectConfig};
pub use connection::{ActionSubmitter, AmiConnection, Connector, ConnectionState, TcpConnector};
pub use error::{AmiError, AmiResult, StepFailure};
pub use events::{
    EventFilter, EventRouter, Notification, NotificationHandler, SubscriptionId, LINK_DOWN_EVENT, LINK_UP_EVENT,
};
pub use record::{Record, Reply};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
