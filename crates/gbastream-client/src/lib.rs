pub mod bootstrap;
pub mod candidates;
pub mod client;
pub mod events;
pub mod input;
pub mod latency;
pub mod media;
pub mod negotiation;
pub mod reconnect;
pub mod session;
pub mod shutdown;
pub mod signaling;
pub mod types;

#[cfg(test)]
mod test_support;

pub use bootstrap::{EndpointSource, SessionBootstrap, SessionEndpoints, StaticEndpoints};
pub use client::run_session;
pub use events::{event_channel, Channel, EventReceiver, EventSender, SessionEvent};
pub use input::{input_handle, ButtonQueue, InputChannel, InputHandle, KeyMap};
pub use media::{ConnectionState, IceState, RemoteTrack, TrackKind, WebRtcConnector};
pub use reconnect::ReconnectPolicy;
pub use session::MediaSession;
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use signaling::WsConnector;
pub use types::ClientConfig;
