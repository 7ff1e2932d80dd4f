use futures_util::{stream, SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::auth::ApiCreds;
use crate::errors::ClobError;
use crate::websocket::models::ClobSocketMessage;

const CLOB_WS_BASE: &str = "wss://ws-subscriptions-clob.polymarket.com/ws";

/// The market channel's subscribe limit per message.
const SUBSCRIBE_CHUNK: usize = 500;

/// Which of the two CLOB subscription channels a socket speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsChannel {
    /// Public price_change events, keyed by token (asset) id.
    Market,
    /// Authenticated trade/order events, keyed by condition id.
    User,
}

impl WsChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            WsChannel::Market => "market",
            WsChannel::User => "user",
        }
    }
}

/// One websocket connection to the CLOB.
///
/// Reconnection policy and subscription bookkeeping belong to the caller;
/// this type only connects, speaks the handshake/subscribe protocol and
/// decodes frames.
pub struct ClobWebsocketClient {
    sender: Mutex<Option<stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>>>,
    receiver: Mutex<Option<stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>>>,
    channel: WsChannel,
    creds: Option<ApiCreds>,
    base_url: String,
}

impl ClobWebsocketClient {
    /// `creds` are required for [`WsChannel::User`] and ignored for
    /// [`WsChannel::Market`].
    pub fn new(channel: WsChannel, creds: Option<ApiCreds>) -> Self {
        ClobWebsocketClient {
            sender: Mutex::new(None),
            receiver: Mutex::new(None),
            channel,
            creds,
            base_url: CLOB_WS_BASE.to_string(),
        }
    }

    pub fn new_with_url(channel: WsChannel, creds: Option<ApiCreds>, base_url: String) -> Self {
        let mut client = Self::new(channel, creds);
        client.base_url = base_url;
        client
    }

    pub fn channel(&self) -> WsChannel {
        self.channel
    }

    /// Connect and send the channel handshake (which declares the channel
    /// type, and carries auth for the user channel).
    pub async fn connect(&self) -> Result<(), ClobError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), self.channel.as_str());
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| ClobError::Other(format!("error forming ws connection: {e}")))?;
        let (sender, receiver) = ws_stream.split();
        {
            let mut lock = self.sender.lock().await;
            *lock = Some(sender);
        }
        {
            let mut lock = self.receiver.lock().await;
            *lock = Some(receiver);
        }
        self.send_text(self.handshake_message()?).await
    }

    fn handshake_message(&self) -> Result<String, ClobError> {
        let msg = match self.channel {
            WsChannel::Market => json!({"assets_ids": [], "type": "market"}),
            WsChannel::User => {
                let creds = self.creds.as_ref().ok_or(ClobError::CredentialMissing)?;
                json!({
                    "markets": [],
                    "type": "user",
                    "auth": {
                        "apiKey": creds.api_key,
                        "secret": creds.secret,
                        "passphrase": creds.passphrase,
                    },
                })
            }
        };
        Ok(msg.to_string())
    }

    /// Subscribe to token ids (market channel), chunked to the server's
    /// per-message limit.
    pub async fn subscribe_assets(&self, asset_ids: &[String]) -> Result<(), ClobError> {
        if self.channel != WsChannel::Market {
            return Err(ClobError::Other("subscribe_assets on user channel".into()));
        }
        for chunk in asset_ids.chunks(SUBSCRIBE_CHUNK) {
            let msg = json!({"assets_ids": chunk, "operation": "subscribe"});
            self.send_text(msg.to_string()).await?;
        }
        Ok(())
    }

    /// Subscribe to condition ids (user channel, re-asserting auth).
    pub async fn subscribe_markets(&self, condition_ids: &[String]) -> Result<(), ClobError> {
        if self.channel != WsChannel::User {
            return Err(ClobError::Other("subscribe_markets on market channel".into()));
        }
        let creds = self.creds.as_ref().ok_or(ClobError::CredentialMissing)?;
        let msg = json!({
            "markets": condition_ids,
            "auth": {
                "apiKey": creds.api_key,
                "secret": creds.secret,
                "passphrase": creds.passphrase,
            },
            "operation": "subscribe",
        });
        self.send_text(msg.to_string()).await
    }

    /// Text-level heartbeat, sent in addition to protocol pings.
    pub async fn send_ping(&self) -> Result<(), ClobError> {
        self.send_text("PING".to_string()).await
    }

    pub async fn send_text(&self, message: String) -> Result<(), ClobError> {
        let mut lock = self.sender.lock().await;
        match lock.as_mut() {
            Some(sender) => sender
                .send(Message::text(message))
                .await
                .map_err(|e| ClobError::Other(format!("ws send failed: {e}"))),
            None => Err(ClobError::Other(
                "`sender` field is none. call connect method first".into(),
            )),
        }
    }

    async fn next_unparsed_message(&self) -> Result<Message, ClobError> {
        let mut lock = self.receiver.lock().await;
        let receiver = lock.as_mut().ok_or_else(|| {
            ClobError::Other("`receiver` field is none. call connect method first".into())
        })?;
        match receiver.next().await {
            Some(res) => res.map_err(|e| ClobError::Other(format!("{e}"))),
            None => Err(ClobError::Other("Next message resolved to None".into())),
        }
    }

    pub async fn next_message(&self) -> Result<ClobSocketMessage, ClobError> {
        let message = self.next_unparsed_message().await?;
        TryInto::<ClobSocketMessage>::try_into(message)
    }
}
