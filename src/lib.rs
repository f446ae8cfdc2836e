//! Aden - login and server-directory front-end for a sharded game cluster.
//!
//! Speaks two TCP protocols at once: the client protocol (credential check,
//! server list, play-token issuance) and the game-server protocol (node
//! registration, session-handoff validation, character-count reporting).

/// Server configuration (YAML + defaults)
pub mod config;
/// Wire plumbing: framing, crypto pipeline, packet codec, subnet matching
pub mod network;
/// Game-server registry and advertised-address resolution
pub mod registry;
/// Session-key ledger for the login → game handoff
pub mod session;
/// TTL cache of per-account character counts
pub mod charcount;
/// Server implementations (login)
pub mod servers;
