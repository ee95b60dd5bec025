pub mod bridge;
pub mod handshake;

pub use bridge::{BridgeError, BridgeFactory, PluginBridge};
pub use handshake::{GroupRequest, GroupResponse, HandshakeError};
