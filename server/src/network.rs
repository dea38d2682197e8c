//! Server network layer: WebSocket accept loop, per-connection tasks and the
//! periodic session ticks.

use crate::session::{LeaveReason, Membership, Session};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::SessionConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

/// Inbound traffic handed from connection tasks to the session dispatcher.
#[derive(Debug)]
pub enum SessionEvent {
    Frame { member: Membership, frame: Bytes },
    Control { member: Membership, text: String },
    Closed { member: Membership },
}

/// Aborts the wrapped tasks when dropped.
struct TaskSet(Vec<JoinHandle<()>>);

impl Drop for TaskSet {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// Accepts WebSocket connections and runs one [`Session`] over them.
pub struct Server {
    listener: TcpListener,
    session: Arc<Session>,
}

impl Server {
    pub async fn bind(addr: &str, config: SessionConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            session: Arc::new(Session::new(config)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    /// Runs the accept loop. Background tasks stop when the returned future
    /// is dropped.
    pub async fn run(self) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let _tasks = TaskSet(vec![
            spawn_dispatcher(Arc::clone(&self.session), event_rx),
            spawn_broadcast_tick(Arc::clone(&self.session)),
            spawn_probe_tick(Arc::clone(&self.session)),
            spawn_eviction_tick(Arc::clone(&self.session)),
        ]);

        info!("Server started successfully");

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let session = Arc::clone(&self.session);
                    let events = event_tx.clone();
                    tokio::spawn(serve_connection(stream, addr, session, events));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Drives one connection from handshake to close.
///
/// Reads run here and are forwarded as [`SessionEvent`]s; writes run in a
/// separate task draining the connection's outbound queue. When either side
/// ends, the connection is reported closed.
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    session: Arc<Session>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let handshake = tokio::time::timeout(session.config().connect_timeout, accept_async(stream));
    let ws = match handshake.await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
        Err(_) => {
            warn!(
                "WebSocket handshake with {} not completed within {:?}, dropping",
                addr,
                session.config().connect_timeout
            );
            return;
        }
    };

    let (ws_sender, mut ws_receiver) = ws.split();
    let (out_tx, out_rx) = session.outbound_channel();
    let mut writer = tokio::spawn(write_outbound(ws_sender, out_rx));

    let member = match session.join(out_tx).await {
        Ok(member) => member,
        Err(e) => {
            warn!("Rejecting connection from {}: {}", addr, e);
            let _ = writer.await;
            return;
        }
    };
    debug!("Connection from {} is participant {}", addr, member.id);

    loop {
        tokio::select! {
            message = ws_receiver.next() => {
                let event = match message {
                    Some(Ok(Message::Binary(frame))) => SessionEvent::Frame { member, frame },
                    Some(Ok(Message::Text(text))) => SessionEvent::Control {
                        member,
                        text: text.as_str().to_owned(),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("Transport error on participant {}: {}", member.id, e);
                        break;
                    }
                };

                if events.send(event).is_err() {
                    break;
                }
            }
            // queue closed after eviction, or the transport stopped accepting writes
            _ = &mut writer => break,
        }
    }

    let _ = events.send(SessionEvent::Closed { member });
    writer.abort();
}

async fn write_outbound(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut queue: mpsc::Receiver<Message>,
) {
    while let Some(message) = queue.recv().await {
        if let Err(e) = sink.send(message).await {
            debug!("Failed to write to connection: {}", e);
            return;
        }
    }

    let _ = sink.close().await;
}

fn spawn_dispatcher(
    session: Arc<Session>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Frame { member, frame } => session.handle_frame(member, frame).await,
                SessionEvent::Control { member, text } => {
                    session.handle_control(member, &text).await
                }
                SessionEvent::Closed { member } => {
                    session.leave(member, LeaveReason::Closed).await;
                }
            }
        }
    })
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

fn spawn_broadcast_tick(session: Arc<Session>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(session.config().broadcast_period);
        // Skip the first tick since it fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            session.broadcast_states().await;
        }
    })
}

fn spawn_probe_tick(session: Arc<Session>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(session.config().probe_period);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            session.probe_liveness().await;
        }
    })
}

fn spawn_eviction_tick(session: Arc<Session>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(session.config().eviction_period);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = session.evict_stale().await;
            if !evicted.is_empty() {
                debug!("Eviction tick removed {:?}", evicted);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{encode_update, ControlMessage, StateRecord};

    fn member(id: u16) -> Membership {
        Membership { id, serial: id as u64 }
    }

    #[test]
    fn test_session_event_creation() {
        let frame = encode_update(&StateRecord::new(3));
        let event = SessionEvent::Frame {
            member: member(3),
            frame: frame.clone(),
        };

        match event {
            SessionEvent::Frame { member: m, frame: f } => {
                assert_eq!(m.id, 3);
                assert_eq!(f, frame);
            }
            _ => panic!("Unexpected event type"),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_applies_events_in_order() {
        let session = Arc::new(Session::new(SessionConfig::default()));
        let (out_tx, _out_rx) = session.outbound_channel();
        let joined = session.join(out_tx).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = spawn_dispatcher(Arc::clone(&session), rx);

        let pong = ControlMessage::Pong { id: joined.id }.to_json().unwrap();
        tx.send(SessionEvent::Control { member: joined, text: pong }).unwrap();
        tx.send(SessionEvent::Closed { member: joined }).unwrap();
        drop(tx);

        dispatcher.await.unwrap();
        assert_eq!(session.participant_count().await, 0);
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let server = tokio_test::assert_ok!(Server::bind("127.0.0.1:0", SessionConfig::default()).await);
        let addr = tokio_test::assert_ok!(server.local_addr());

        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert_eq!(server.session().participant_count().await, 0);
    }

    #[tokio::test]
    async fn test_unfinished_handshake_is_dropped() {
        let config = SessionConfig {
            connect_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        };
        let session = Arc::new(Session::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // opens TCP and never sends the upgrade request
        let _idle_peer = TcpStream::connect(addr).await.unwrap();
        let (stream, peer_addr) = listener.accept().await.unwrap();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let served = tokio::time::timeout(
            Duration::from_secs(2),
            serve_connection(stream, peer_addr, Arc::clone(&session), events_tx),
        )
        .await;

        assert!(served.is_ok());
        assert_eq!(session.participant_count().await, 0);
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_run_independently() {
        let config = SessionConfig {
            broadcast_period: Duration::from_millis(100),
            probe_period: Duration::from_millis(250),
            ..SessionConfig::default()
        };
        let session = Arc::new(Session::new(config));
        let (out_tx, mut out_rx) = session.outbound_channel();
        session.join(out_tx).await.unwrap();

        let _tasks = TaskSet(vec![
            spawn_broadcast_tick(Arc::clone(&session)),
            spawn_probe_tick(Arc::clone(&session)),
        ]);

        tokio::time::sleep(Duration::from_millis(560)).await;

        let mut frames = 0;
        let mut probes = 0;
        while let Ok(message) = out_rx.try_recv() {
            match message {
                Message::Binary(_) => frames += 1,
                Message::Text(text) => {
                    if ControlMessage::parse(text.as_str()).unwrap() == ControlMessage::Ping {
                        probes += 1;
                    }
                }
                _ => {}
            }
        }

        assert_eq!(frames, 5);
        assert_eq!(probes, 2);
    }
}
