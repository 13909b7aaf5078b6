//! authkit: token-based authentication API.
//!
//! Short-lived signed access tokens travel in the `Authorization` header;
//! rotating refresh tokens travel in an httpOnly cookie and are tracked
//! server-side by SHA-256 hash so they can be revoked before they expire.

pub mod auth;
pub mod config;
pub mod db;
pub mod gateway;

pub use config::Config;
