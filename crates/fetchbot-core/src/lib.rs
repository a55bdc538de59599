pub mod config;
pub mod logging;

pub mod adapters;
pub mod admission;
pub mod cache;
pub mod channel;
pub mod delivery;
pub mod error;
pub mod extract;
pub mod media;
pub mod pipeline;
pub mod progress;
pub mod request;
pub mod retry;
pub mod store;
pub mod workspace;
