//! Session state shared by every connection handler and periodic task.
//!
//! A [`Session`] owns the connection registry and the identity allocator, each
//! behind its own mutex, and is handed to the network layer as `Arc<Session>`.
//! The two locks are never held at the same time.
//!
//! Every send from here is a non-blocking `try_send` into a per-connection
//! queue, so one slow consumer can only lose its own messages.

use crate::allocator::{AllocatorError, IdentityAllocator};
use crate::registry::{ConnectionEntry, ConnectionRegistry};
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use shared::{decode_update, encode_update, ControlError, ControlMessage, SessionConfig, StateRecord};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Allocator(#[from] AllocatorError),

    #[error("failed to build control message: {0}")]
    Control(#[from] ControlError),
}

/// Identifies one admitted connection: the participant id plus the serial of
/// the transport holding it. Events carrying a stale serial are ignored, so a
/// closed connection can never touch an id that was reassigned since.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Membership {
    pub id: u16,
    pub serial: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    Closed,
    Evicted,
}

pub struct Session {
    config: SessionConfig,
    registry: Mutex<ConnectionRegistry>,
    allocator: Mutex<IdentityAllocator>,
    next_serial: AtomicU64,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let allocator = IdentityAllocator::new(config.id_policy);
        Self {
            config,
            registry: Mutex::new(ConnectionRegistry::new()),
            allocator: Mutex::new(allocator),
            next_serial: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Creates the bounded outbound queue for a new connection.
    pub fn outbound_channel(&self) -> (mpsc::Sender<Message>, mpsc::Receiver<Message>) {
        mpsc::channel(self.config.outbound_capacity)
    }

    /// Admits a new connection.
    ///
    /// Assigns an id, confirms it to the newcomer, announces it to everyone
    /// else, replays every other participant's latest record to the newcomer
    /// and finally registers it with a zeroed record.
    pub async fn join(&self, sender: mpsc::Sender<Message>) -> Result<Membership, SessionError> {
        let id = self.allocator.lock().await.acquire()?;

        let joined = match (ControlMessage::Joined { id }).to_json() {
            Ok(json) => Message::text(json),
            Err(e) => {
                self.allocator.lock().await.release(id);
                return Err(e.into());
            }
        };
        let member = Membership {
            id,
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
        };

        let mut registry = self.registry.lock().await;

        deliver(&sender, id, joined.clone());
        for (other, other_sender) in registry.senders(None) {
            deliver(&other_sender, other, joined.clone());
        }
        for (_, record) in registry.all_active() {
            deliver(&sender, id, Message::Binary(encode_update(&record)));
        }

        registry.insert(ConnectionEntry::new(id, member.serial, sender));
        info!("Participant {} joined ({} active)", id, registry.len());

        Ok(member)
    }

    /// Applies a binary state frame from `member` and relays it to everyone else.
    ///
    /// Undecodable frames are dropped. The id inside the frame is always
    /// replaced by the sender's assigned id.
    pub async fn handle_frame(&self, member: Membership, frame: Bytes) {
        let record = match decode_update(&frame) {
            Ok(record) => record,
            Err(e) => {
                warn!("Dropping frame from participant {}: {}", member.id, e);
                return;
            }
        };

        let relay = if record.id == member.id {
            frame
        } else {
            debug!(
                "Participant {} sent a frame declaring id {}, restamping",
                member.id, record.id
            );
            restamp(&frame, member.id)
        };
        let record = record.with_id(member.id);

        let mut registry = self.registry.lock().await;
        if !registry.is_held_by(member.id, member.serial) {
            debug!("Ignoring frame from departed participant {}", member.id);
            return;
        }

        registry.upsert(member.id, record);
        for (other, other_sender) in registry.senders(Some(member.id)) {
            deliver(&other_sender, other, Message::Binary(relay.clone()));
        }
    }

    /// Applies a text control message from `member`.
    pub async fn handle_control(&self, member: Membership, text: &str) {
        let message = match ControlMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "Dropping control message from participant {}: {}",
                    member.id, e
                );
                return;
            }
        };

        match message {
            ControlMessage::Pong { id } => {
                if id != member.id {
                    warn!(
                        "Participant {} answered a probe as id {}, crediting the sender",
                        member.id, id
                    );
                }

                let mut registry = self.registry.lock().await;
                if registry.is_held_by(member.id, member.serial) {
                    registry.touch_liveness(member.id);
                }
            }
            other => {
                warn!(
                    "Unexpected control message from participant {}: {:?}",
                    member.id, other
                );
            }
        }
    }

    /// Removes `member`, tells everyone else and releases its id.
    ///
    /// The departure is announced before the id is released, so a newcomer
    /// reusing the id is always announced after it. Returns false when the
    /// membership is no longer current, which makes a close that follows an
    /// eviction harmless.
    pub async fn leave(&self, member: Membership, reason: LeaveReason) -> bool {
        let left = (ControlMessage::Left { id: member.id }).to_json();

        let remaining = {
            let mut registry = self.registry.lock().await;
            if !registry.is_held_by(member.id, member.serial) {
                return false;
            }
            registry.remove(member.id);

            match &left {
                Ok(json) => {
                    let message = Message::text(json.clone());
                    for (other, other_sender) in registry.senders(None) {
                        deliver(&other_sender, other, message.clone());
                    }
                }
                Err(e) => warn!("Failed to announce departure of {}: {}", member.id, e),
            }
            registry.len()
        };

        self.allocator.lock().await.release(member.id);

        match reason {
            LeaveReason::Closed => info!(
                "Participant {} disconnected ({} active)",
                member.id, remaining
            ),
            LeaveReason::Evicted => info!(
                "Participant {} evicted after missing liveness replies ({} active)",
                member.id, remaining
            ),
        }

        true
    }

    /// Sends every registered record to every connection, one frame per id.
    ///
    /// Each record is encoded once and the same buffer is shared by all
    /// recipients. Frames are queued under the registry lock so they can never
    /// overtake a departure announcement. Returns the number of frames per
    /// recipient.
    pub async fn broadcast_states(&self) -> usize {
        let registry = self.registry.lock().await;
        let frames: Vec<Bytes> = registry
            .all_active()
            .iter()
            .map(|(_, record)| encode_update(record))
            .collect();

        for (id, sender) in registry.senders(None) {
            for frame in &frames {
                deliver(&sender, id, Message::Binary(frame.clone()));
            }
        }

        frames.len()
    }

    /// Sends a liveness probe to every connection.
    pub async fn probe_liveness(&self) {
        let ping = match ControlMessage::Ping.to_json() {
            Ok(json) => Message::text(json),
            Err(e) => {
                warn!("Failed to build liveness probe: {}", e);
                return;
            }
        };

        let registry = self.registry.lock().await;
        for (id, sender) in registry.senders(None) {
            deliver(&sender, id, ping.clone());
        }
    }

    /// Evicts every connection whose last liveness reply is older than the
    /// configured threshold, whether or not its transport reported closure.
    pub async fn evict_stale(&self) -> Vec<u16> {
        let stale: Vec<Membership> = {
            let registry = self.registry.lock().await;
            registry
                .stale_ids(self.config.eviction_threshold)
                .into_iter()
                .filter_map(|id| {
                    registry.serial(id).map(|serial| Membership { id, serial })
                })
                .collect()
        };

        let mut evicted = Vec::with_capacity(stale.len());
        for member in stale {
            if self.leave(member, LeaveReason::Evicted).await {
                evicted.push(member.id);
            }
        }
        evicted
    }

    pub async fn latest(&self, id: u16) -> Option<StateRecord> {
        self.registry.lock().await.get(id)
    }

    pub async fn participant_ids(&self) -> Vec<u16> {
        self.registry.lock().await.ids()
    }

    pub async fn participant_count(&self) -> usize {
        self.registry.lock().await.len()
    }
}

fn deliver(sender: &mpsc::Sender<Message>, id: u16, message: Message) -> bool {
    match sender.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!("Outbound queue of participant {} is full, dropping message", id);
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Outbound queue of participant {} is closed", id);
            false
        }
    }
}

/// Copies a frame with its leading id field replaced.
fn restamp(frame: &[u8], id: u16) -> Bytes {
    let mut patched = BytesMut::from(frame);
    patched[..2].copy_from_slice(&id.to_be_bytes());
    patched.freeze()
}
