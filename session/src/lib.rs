pub mod client;
pub mod clock;
pub mod config;
pub mod consistency;
pub mod directory;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod paint;
pub mod paths;
pub mod reaper;
pub mod rematch;
pub mod replication;
pub mod store;

pub use client::{GameplayListener, SessionClient};
pub use config::SessionConfig;
pub use directory::{Membership, SessionDirectory};
pub use error::SessionError;
