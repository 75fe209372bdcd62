//! # Emberlink Game Server Core
//!
//! Authoritative server core for small real-time games. Clients connect over
//! a dual transport (TCP stream + UDP datagrams); an out-of-band handshake
//! binds the two into one logical session, a challenge-response authenticates
//! it, and periodic tick loops broadcast framed datagrams to every
//! authenticated session.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        EMBERLINK CORE                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  net/            - Transports and session plumbing           │
//! │  ├── wire.rs     - Framing limits, serial arithmetic,        │
//! │  │                 tick datagram layout                      │
//! │  ├── stream.rs   - Line + length-prefixed framing over TCP   │
//! │  ├── datagram.rs - Sequence-framed I/O over the shared UDP   │
//! │  │                 socket                                    │
//! │  ├── session.rs  - Bound client: both transports, metrics    │
//! │  ├── registry.rs - Raw connections + bound sessions          │
//! │  ├── auth.rs     - HMAC-SHA256 challenge-response            │
//! │  └── acceptor.rs - Listeners and the handshake state machine │
//! │                                                              │
//! │  tick/           - Periodic work and broadcast               │
//! │  ├── dispatcher.rs - Processor registry, tick datagrams      │
//! │  └── scheduler.rs  - One compensated loop per tick kind      │
//! │                                                              │
//! │  game/           - Game-module registration surface          │
//! │  lifecycle.rs    - Component states and the supervisor       │
//! │  server.rs       - Wires everything together                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Session lifecycle
//!
//! A session exists only once both transports are bound: the server sends
//! `HANDSHAKE|<nonce>|<addr>|<port>` on the stream, the client echoes the
//! nonce on the datagram socket, and the acceptor welds the pair together.
//! Until authentication succeeds the session receives no tick traffic.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod game;
pub mod lifecycle;
pub mod net;
pub mod server;
pub mod tick;

// Re-export commonly used types
pub use config::ServerConfig;
pub use game::GameModule;
pub use lifecycle::{Component, ComponentState, Supervisor};
pub use net::acceptor::{Acceptor, InboundDatagram};
pub use net::registry::SessionRegistry;
pub use net::session::Session;
pub use server::{GameServer, ServerError, ServerStatus};
pub use tick::dispatcher::{TickDispatcher, TickHooks};
pub use tick::scheduler::TickScheduler;
pub use tick::TickKind;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default TCP port for the stream listener.
pub const DEFAULT_STREAM_PORT: u16 = 9997;

/// Default UDP port for the datagram listener.
pub const DEFAULT_DATAGRAM_PORT: u16 = 9998;
