use crate::roster::Roster;
use crate::traffic::TrafficMeter;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{decode_update, encode_update, ControlMessage, StateRecord};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `disconnect` waits for the close frame to be written.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Joined,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no join confirmation within {0:?}")]
    ConnectTimeout(Duration),

    #[error("transport unavailable: {0}")]
    TransportUnavailable(#[from] tungstenite::Error),

    #[error("connection closed before the server assigned an id")]
    HandshakeFailed,
}

/// One participant's connection to a session server.
///
/// Keeps the [`Roster`] of the other participants current, answers liveness
/// probes on its own and sends this participant's state updates.
pub struct SessionClient {
    state: Arc<watch::Sender<ClientState>>,
    id: Option<u16>,
    roster: Roster,
    traffic: Arc<Mutex<TrafficMeter>>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Default for SessionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionClient {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ClientState::Disconnected);
        Self {
            state: Arc::new(state),
            id: None,
            roster: Roster::new(),
            traffic: Arc::new(Mutex::new(TrafficMeter::default())),
            outbound: None,
            reader: None,
            writer: None,
        }
    }

    /// Opens the transport and waits for the server to assign an id.
    ///
    /// Whichever comes first decides the outcome: the join confirmation
    /// resolves with the assigned id, the timer fails with
    /// [`ClientError::ConnectTimeout`] and discards the transport.
    pub async fn connect(&mut self, url: &str, timeout: Duration) -> Result<u16, ClientError> {
        self.disconnect().await;
        self.state.send_replace(ClientState::Connecting);
        info!("Connecting to {}...", url);

        let attempt = tokio::time::timeout(timeout, open(url)).await;
        let (ws, id, early) = match attempt {
            Ok(Ok(joined)) => joined,
            Ok(Err(e)) => {
                warn!("Failed to join {}: {}", url, e);
                self.state.send_replace(ClientState::Disconnected);
                return Err(e);
            }
            Err(_) => {
                warn!("Timed out after {:?} waiting to join {}", timeout, url);
                self.state.send_replace(ClientState::Disconnected);
                return Err(ClientError::ConnectTimeout(timeout));
            }
        };

        for record in early.into_iter().filter(|record| record.id != id) {
            self.roster.upsert(record).await;
        }

        let (sink, stream) = ws.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        self.traffic.lock().await.clear();
        self.writer = Some(tokio::spawn(write_outbound(sink, out_rx)));
        self.reader = Some(tokio::spawn(read_inbound(
            stream,
            id,
            out_tx.clone(),
            self.roster.clone(),
            Arc::clone(&self.traffic),
            Arc::clone(&self.state),
        )));
        self.outbound = Some(out_tx);
        self.id = Some(id);
        self.state.send_replace(ClientState::Joined);

        info!("Joined as participant {}", id);
        Ok(id)
    }

    /// Queues this participant's state for the server.
    ///
    /// The record's id is replaced by the assigned one. Does nothing unless
    /// the client has joined.
    pub fn send_update(&self, record: &StateRecord) {
        let (outbound, id) = match (&self.outbound, self.id()) {
            (Some(outbound), Some(id)) => (outbound, id),
            _ => {
                warn!("Not joined, dropping state update");
                return;
            }
        };

        let frame = encode_update(&record.with_id(id));
        if outbound.send(Message::Binary(frame)).is_err() {
            warn!("Connection closed, dropping state update");
        }
    }

    /// Closes the transport and forgets every other participant.
    pub async fn disconnect(&mut self) {
        // the reader holds a queue handle for pongs
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }

        // with every queue handle gone the writer sends a close frame
        self.outbound = None;
        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
                debug!("Close frame not written within {:?}", CLOSE_GRACE);
            }
        }

        if self.id.take().is_some() {
            info!("Disconnected from server");
        }
        self.roster.clear().await;
        self.traffic.lock().await.clear();
        self.state.send_replace(ClientState::Disconnected);
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// Assigned id while joined.
    pub fn id(&self) -> Option<u16> {
        match self.state() {
            ClientState::Joined => self.id,
            _ => None,
        }
    }

    pub fn roster(&self) -> Roster {
        self.roster.clone()
    }

    /// Received state traffic over the last second.
    pub async fn received_bytes_per_second(&self) -> f64 {
        self.traffic.lock().await.bytes_per_second()
    }

    pub async fn received_frames_per_second(&self) -> usize {
        self.traffic.lock().await.frames_in_window()
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

/// Connects and reads until the server confirms an id.
///
/// State frames arriving first are held back and returned with the id, so a
/// failed attempt leaves nothing behind in the roster.
async fn open(url: &str) -> Result<(WsStream, u16, Vec<StateRecord>), ClientError> {
    let (mut ws, _) = connect_async(url).await?;
    debug!("Transport to {} open, waiting for id", url);

    let mut early = Vec::new();
    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => match ControlMessage::parse(text.as_str()) {
                Ok(ControlMessage::Joined { id }) => return Ok((ws, id, early)),
                Ok(other) => debug!("Ignoring {:?} before join", other),
                Err(e) => warn!("Dropping control message: {}", e),
            },
            Message::Binary(frame) => match decode_update(&frame) {
                Ok(record) => early.push(record),
                Err(e) => warn!("Dropping state frame: {}", e),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    Err(ClientError::HandshakeFailed)
}

async fn write_outbound(mut sink: SplitSink<WsStream, Message>, mut queue: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = queue.recv().await {
        if let Err(e) = sink.send(message).await {
            debug!("Failed to write to server: {}", e);
            return;
        }
    }

    let _ = sink.close().await;
}

async fn read_inbound(
    mut stream: SplitStream<WsStream>,
    own_id: u16,
    outbound: mpsc::UnboundedSender<Message>,
    roster: Roster,
    traffic: Arc<Mutex<TrafficMeter>>,
    state: Arc<watch::Sender<ClientState>>,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Binary(frame)) => {
                traffic.lock().await.record(frame.len());
                match decode_update(&frame) {
                    Ok(record) if record.id == own_id => {}
                    Ok(record) => roster.upsert(record).await,
                    Err(e) => warn!("Dropping state frame: {}", e),
                }
            }
            Ok(Message::Text(text)) => {
                handle_control(text.as_str(), own_id, &outbound, &roster).await
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Connection error: {}", e);
                break;
            }
        }
    }

    roster.clear().await;
    state.send_replace(ClientState::Disconnected);
    info!("Server closed the connection");
}

async fn handle_control(
    text: &str,
    own_id: u16,
    outbound: &mpsc::UnboundedSender<Message>,
    roster: &Roster,
) {
    let message = match ControlMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Dropping control message: {}", e);
            return;
        }
    };

    match message {
        ControlMessage::Ping => match (ControlMessage::Pong { id: own_id }).to_json() {
            Ok(json) => {
                let _ = outbound.send(Message::text(json));
            }
            Err(e) => warn!("Failed to answer liveness probe: {}", e),
        },
        ControlMessage::Joined { id } if id != own_id => {
            debug!("Participant {} joined", id);
            roster.add(id).await;
        }
        ControlMessage::Left { id } => {
            if roster.remove(id).await {
                debug!("Participant {} left", id);
            }
        }
        other => debug!("Ignoring {:?}", other),
    }
}
