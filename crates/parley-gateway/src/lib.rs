pub mod connection;
pub mod presence;
pub mod router;
pub mod token;
