//! The Growbot link layer: robot links, video relays, user notification
//! sessions, and the HTTP surface that drives them.

pub mod api;
pub mod auth;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod fanout;
pub mod health;
pub mod inbound;
pub mod link;
pub mod metrics;
pub mod mjpeg;
pub mod relay;
pub mod robot_link;
pub mod server;
pub mod shutdown;
mod socket;
pub mod user_session;
pub mod video;

#[cfg(test)]
mod testing;

pub use config::ServerConfig;
pub use server::{AppState, GrowbotServer};
pub use shutdown::ShutdownCoordinator;
