//! Server implementations. The login server is the only process here; game
//! servers are remote peers that register themselves over TCP.

pub mod login;
