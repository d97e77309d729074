pub mod config;
pub mod logging;

pub mod auth;
pub mod retry;
pub mod settings;
pub mod transport;
pub mod upload;
