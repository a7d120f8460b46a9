pub mod auth;
pub mod buggy;
pub mod client;
pub mod error;
pub mod rtp;
pub mod sdp;
pub mod server;
pub mod session;
pub mod transport;

pub use client::RtspClient;
pub use error::{Result, RtspError};
pub use server::{Server, ServerConfig};
pub use session::{Session, SessionEvent};
