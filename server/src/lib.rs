//! # Character Sync Server Library
//!
//! Authoritative side of the character-state synchronization protocol. The
//! server assigns every participant an id, keeps the latest state record of
//! each one, relays state frames between participants and periodically
//! rebroadcasts the full roster so everyone converges on the same view.
//!
//! ## Module Organization
//!
//! ### Allocator (`allocator`)
//! Issues and reclaims participant ids under a configurable reuse policy.
//!
//! ### Registry (`registry`)
//! Maps each participant id to its outbound queue, latest state record and
//! last liveness reply.
//!
//! ### Session (`session`)
//! Owns the registry and allocator and implements every protocol transition:
//! join, state frame relay, liveness replies, leave, and the bodies of the
//! broadcast, probe and eviction ticks.
//!
//! ### Network (`network`)
//! Accepts WebSocket connections, runs a reader and a writer task per
//! connection, feeds inbound traffic to the session through a single event
//! channel and spawns the three periodic tasks.
//!
//! ## Connection Lifecycle
//!
//! A connection is `Pending` between the WebSocket handshake and admission,
//! `Active` once it holds an id, and `Closed` after the transport ends or the
//! eviction tick finds it has not answered a liveness probe within the
//! eviction threshold. Closing removes the registry entry, releases the id and
//! announces the departure to everyone else.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::SessionConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind("127.0.0.1:8080", SessionConfig::default()).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod allocator;
pub mod network;
pub mod registry;
pub mod session;
