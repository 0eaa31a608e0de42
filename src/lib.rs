// Library modules
pub mod config;
pub mod constants;
pub mod demo;
pub mod diff;
pub mod frame;
pub mod keymap;
pub mod mux;
pub mod protocol;
pub mod registry;
pub mod renderer;
pub mod serve;
pub mod session;
pub mod subscriber;
pub mod tunnel;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::Config;
pub use diff::{apply, diff};
pub use frame::{style, CursorState, FrameSnapshot, Line, LineDiff, Point, Selection, Span};
pub use mux::{AdmissionError, HookProvider, MuxServer, StreamDefaults};
pub use protocol::{
    ClientMessage, Envelope, Modifiers, MouseAction, ServerMessage, UpstreamErrorInfo,
    UpstreamEvent,
};
pub use registry::SessionRegistry;
pub use renderer::{Renderer, RendererFactory, SelectionEvent};
pub use session::{
    spawn_driver, CleanupHandle, ConnectionHook, Session, SessionConfig, SessionHandle,
};
pub use subscriber::{SubscriberEvent, SubscriberMux, Subscription};
pub use tunnel::{TunnelClient, TunnelConfig, TunnelError, TunnelStatus};
