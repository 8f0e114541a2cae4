use super::{Connector, Link};
use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, trace};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Connects to the hardware-control backend over a websocket.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        let (out_tx, out_rx) = unbounded_channel::<String>();
        let (in_tx, in_rx) = unbounded_channel::<String>();

        tokio::task::spawn(async move {
            if let Err(e) = pump(ws, out_rx, in_tx).await {
                error!("Backend websocket error: {e:?}");
            }
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

async fn pump<S>(
    ws: S,
    mut outbound: UnboundedReceiver<String>,
    inbound: UnboundedSender<String>,
) -> Result<()>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let mut hb_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut hb_received = true;

    loop {
        tokio::select! {
            _ = hb_interval.tick() => {
                if !hb_received {
                    error!("Closing backend connection due to no heartbeat");
                    break;
                }

                sink.send(Message::Ping(Default::default())).await?;
                hb_received = false;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    _ = sink.send(Message::Close(None)).await;
                    break;
                };

                sink.send(Message::text(frame)).await?;
            }
            msg = stream.next() => {
                let Some(msg) = msg else {
                    info!("Backend closed the websocket");
                    break;
                };

                match msg? {
                    Message::Text(text) => {
                        hb_received = true;
                        if inbound.send(text.as_str().to_string()).is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => hb_received = true,
                    Message::Ping(payload) => sink.send(Message::Pong(payload)).await?,
                    Message::Close(_) => {
                        info!("Backend closed the websocket");
                        break;
                    }
                    other => trace!("Ignoring ws frame: {other:?}"),
                }
            }
        }
    }

    Ok(())
}
