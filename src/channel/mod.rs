use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub mod request;
pub mod transport;
pub mod ws;

pub use request::Predicate;
pub use transport::{ChannelTransport, ConnectionState};

/// One live connection to the backend, as two text-frame queues.
///
/// Dropping `outbound` closes the connection; `inbound` yielding `None` means
/// the backend side went away.
#[derive(Debug)]
pub struct Link {
    pub outbound: UnboundedSender<String>,
    pub inbound: UnboundedReceiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> anyhow::Result<Link>;
}
