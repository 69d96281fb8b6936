//! portcoord - discovery and request/response over unreliable serial channels
//!
//! portcoord coordinates exchanges with devices attached to half-duplex byte
//! channels. It does not talk to hardware itself: a transport implements
//! [`Channel`] and the application hands the coordinator a populated
//! [`ChannelDirectory`].
//!
//! # Core Concepts
//!
//! - **Discovery**: probe every channel at once and report the first one whose
//!   device answers with the expected acknowledgement
//! - **Request**: send a payload on a known channel, retransmitting until one
//!   reply arrives or the timeout elapses
//! - **At most one result**: a first-wins [`ResponseGate`] decides the winner
//!   of every exchange
//! - **Scoped cleanup**: listeners are removed and retransmission is stopped
//!   on every exit path
//!
//! # Modules
//!
//! - [`channel`] - Channel capability, listener registry, directory, in-memory channel
//! - [`gate`] - Single-shot response gate
//! - [`retransmit`] - Cancellable periodic retransmission
//! - [`coordinator`] - Discovery and request coordinators
//! - [`config`] - Configuration types and loading
//! - [`logging`] - Tracing subscriber setup

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod logging;
pub mod retransmit;

// Re-export commonly used types
pub use channel::{
    Channel, ChannelDirectory, ChannelState, Listener, ListenerId, ListenerRegistry, MemoryChannel,
    MemoryChannelBuilder, OpenOptions,
};
pub use config::{Config, CoordinatorConfig, Parity, SerialSettings};
pub use coordinator::Coordinator;
pub use error::{ChannelError, CoordError};
pub use gate::ResponseGate;
pub use retransmit::{CancelSignal, RetransmitHandle, RetransmitTarget, Retransmitter};
