//! Transport layer - HTTPS requests, session token and the auth gate

pub mod auth;
pub mod http;
pub mod session;

pub use auth::AuthGate;
pub use http::{Accept, RestResponse, RestTransport};
pub use session::{Session, SessionRef};
