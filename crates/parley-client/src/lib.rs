//! Client for the Parley server: an explicit per-session gateway handle and
//! a small REST helper for accounts and history.

pub mod error;
pub mod http;
pub mod session;

pub use error::ClientError;
pub use http::ApiClient;
pub use session::{Session, Subscription};
