use std::time::Duration;

use async_trait::async_trait;
use futures::{channel::mpsc, pin_mut, select, FutureExt, SinkExt, StreamExt};
use tokio::{net::TcpStream, time::Instant};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::api::{
    AuthToken, Broadcast, Error, Feed, FeedMessage, FeedRequest, Subscription, ThreadKey,
};

// Pings will be sent every PING_INTERVAL
const PING_INTERVAL: Duration = Duration::from_secs(10);
// If the interval between two pongs is more than DISCONNECT_INTERVAL, disconnect
const DISCONNECT_INTERVAL: Duration = Duration::from_secs(20);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `Feed` over the store's websocket change feed, one connection per
/// subscription
#[derive(Clone)]
pub struct WsFeed {
    host: String,
    token: AuthToken,
}

fn feed_url(host: &str) -> Result<String, Error> {
    let host = host.trim_end_matches('/');
    if let Some(rest) = host.strip_prefix("https://") {
        Ok(format!("wss://{rest}/ws/comment-feed"))
    } else if let Some(rest) = host.strip_prefix("http://") {
        Ok(format!("ws://{rest}/ws/comment-feed"))
    } else {
        Err(Error::InvalidInput(format!(
            "host {host:?} is neither http:// nor https://"
        )))
    }
}

fn ws_error(err: tokio_tungstenite::tungstenite::Error) -> Error {
    Error::Unavailable(format!("feed connection failed: {err}"))
}

fn request(req: &FeedRequest) -> Result<Message, Error> {
    serde_json::to_string(req)
        .map(Message::Text)
        .map_err(|err| Error::InvalidInput(format!("serializing feed request: {err}")))
}

impl WsFeed {
    pub fn new(host: impl Into<String>, token: AuthToken) -> WsFeed {
        WsFeed {
            host: host.into(),
            token,
        }
    }

    async fn connect(&self, thread: &ThreadKey) -> Result<Socket, Error> {
        let url = feed_url(&self.host)?;
        let (mut sock, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(ws_error)?;

        // Authentify
        sock.send(Message::Text(self.token.0.to_string()))
            .await
            .map_err(ws_error)?;
        match sock.next().await {
            Some(Ok(Message::Text(t))) if t == "ok" => (),
            Some(Ok(Message::Text(t))) => {
                return Err(Error::parse(t.as_bytes()).unwrap_or(Error::NotAuthorized))
            }
            Some(Ok(msg)) => {
                return Err(Error::Unavailable(format!(
                    "unexpected authentication answer {msg:?}"
                )))
            }
            Some(Err(err)) => return Err(ws_error(err)),
            None => {
                return Err(Error::Unavailable(String::from(
                    "feed connection closed during authentication",
                )))
            }
        }

        sock.send(request(&FeedRequest::Subscribe(*thread))?)
            .await
            .map_err(ws_error)?;
        Ok(sock)
    }
}

#[async_trait]
impl Feed for WsFeed {
    async fn subscribe(&self, thread: &ThreadKey) -> Result<Subscription, Error> {
        let sock = self.connect(thread).await?;
        tracing::info!(channel = %thread.channel_name(), "connected to comment feed");
        let (incoming_tx, incoming) = mpsc::unbounded();
        let (outgoing, outgoing_rx) = mpsc::unbounded();
        tokio::spawn(pump(sock, incoming_tx, outgoing_rx));
        Ok(Subscription {
            incoming: incoming.boxed(),
            outgoing,
        })
    }
}

fn parse(data: &[u8]) -> Option<FeedMessage> {
    match serde_json::from_slice(data) {
        Ok(msg) => Some(msg),
        Err(err) => {
            tracing::warn!(?err, "ignoring unparseable feed message");
            None
        }
    }
}

/// Runs the connection until either side goes away; dropping `incoming`
/// signals the subscriber that the connection is lost
async fn pump(
    sock: Socket,
    incoming: mpsc::UnboundedSender<FeedMessage>,
    mut outgoing: mpsc::UnboundedReceiver<Broadcast>,
) {
    let mut sock = sock.fuse();
    let mut next_ping = Instant::now();
    let mut last_pong = Instant::now();
    loop {
        let delay_pong_reception = tokio::time::sleep_until(last_pong + DISCONNECT_INTERVAL).fuse();
        let delay_ping_send = tokio::time::sleep_until(next_ping).fuse();
        pin_mut!(delay_ping_send, delay_pong_reception);
        select! {
            _ = delay_pong_reception => {
                tracing::warn!("no pong from comment feed, disconnecting");
                break;
            }
            _ = delay_ping_send => {
                if let Err(err) = sock.send(Message::Text(String::from("ping"))).await {
                    tracing::error!(?err, "failed pinging comment feed");
                    break;
                }
                next_ping += PING_INTERVAL;
            }
            msg = outgoing.next() => match msg {
                None => {
                    if let Err(err) = sock.close().await {
                        tracing::debug!(?err, "failed closing comment feed");
                    }
                    tracing::info!("disconnected from comment feed");
                    return;
                }
                Some(msg) => {
                    let res = match request(&FeedRequest::Broadcast(msg)) {
                        Ok(msg) => sock.send(msg).await.map_err(ws_error),
                        Err(err) => Err(err),
                    };
                    if let Err(err) = res {
                        // broadcasts are best-effort
                        tracing::debug!(?err, "failed sending broadcast");
                    }
                }
            },
            msg = sock.next() => {
                let msg = match msg {
                    None => break,
                    Some(Err(err)) => {
                        tracing::error!(?err, "comment feed connection errored");
                        break;
                    }
                    Some(Ok(Message::Text(t))) => parse(t.as_bytes()),
                    Some(Ok(Message::Binary(b))) => parse(&b),
                    Some(Ok(Message::Close(_))) => break,
                    // protocol-level ping/pong are answered by tungstenite
                    Some(Ok(_)) => None,
                };
                match msg {
                    None => (),
                    Some(FeedMessage::Pong) => last_pong = Instant::now(),
                    Some(msg) => {
                        if incoming.unbounded_send(msg).is_err() {
                            tracing::debug!("subscriber is gone, closing comment feed");
                            let _ = sock.close().await;
                            return;
                        }
                    }
                }
            }
        }
    }
    tracing::warn!("lost comment feed connection");
}
