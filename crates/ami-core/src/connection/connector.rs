//! Socket establishment

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::AmiConfig;
use crate::error::{AmiError, AmiResult};

/// Byte stream carrying one manager session
pub trait AmiStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AmiStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn AmiStream>;

/// Opens the byte stream for a session
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, config: &AmiConfig) -> AmiResult<BoxedStream>;
}

/// Plain TCP connector
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, config: &AmiConfig) -> AmiResult<BoxedStream> {
        let address = config.address();
        debug!(%address, "Opening manager connection");
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| AmiError::link_down(format!("connect to {}: {}", address, e)))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
