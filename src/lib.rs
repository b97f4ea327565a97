//! discover-relay library
//!
//! Signaling relay that lets peers discover each other and exchange the
//! offer/answer handshake needed for a direct peer-to-peer connection. The
//! relay itself never carries peer-to-peer traffic.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod network;
pub mod rendezvous;
pub mod router;
pub mod server;
pub mod signaling;

pub use config::RelayConfig;
pub use dispatcher::{Dispatcher, ThreadRngSource, UniformSource};
pub use error::{DispatchError, RendezvousError, ValidationError};
pub use network::{Accepted, NetworkDirectory, OfferAcceptor, OfferRelay, SignalingOnlyAcceptor};
pub use rendezvous::{PendingAnswer, RendezvousRegister};
pub use router::SessionRouter;
pub use server::{run_relay_server, RelayServer};
