//! # Character Sync Client Library
//!
//! Participant side of the character-state synchronization protocol. A
//! client connects to a session server, learns its participant id, sends its
//! own character state and keeps a live cache of everyone else's.
//!
//! ## Module Organization
//!
//! ### Network (`network`)
//! [`network::SessionClient`] owns the WebSocket connection. A reader task
//! applies announcements and state frames to the roster and answers liveness
//! probes; a writer task drains the outbound queue.
//!
//! ### Roster (`roster`)
//! Shared cache of the other participants' latest records, readable from the
//! application while the reader task updates it.
//!
//! ### Traffic (`traffic`)
//! Sliding-window meter of received state traffic, useful for diagnostics.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::SessionClient;
//! use shared::{AnimationState, Position, StateRecord};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = SessionClient::new();
//!     let id = client
//!         .connect("ws://127.0.0.1:8080/network", Duration::from_secs(5))
//!         .await?;
//!
//!     let mut me = StateRecord::new(id);
//!     me.position = Position::new(1.0, 0.0, 2.0);
//!     me.state = AnimationState::Walking;
//!     client.send_update(&me);
//!
//!     for other in client.roster().snapshot().await {
//!         println!("{} is {} at {:?}", other.id, other.state, other.position);
//!     }
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod roster;
pub mod traffic;
