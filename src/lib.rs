//! Parlor - a minimal self-hosted server for streaming conversational assistants.

pub mod api;
pub mod build_info;
pub mod config;
pub mod handlers;
pub mod provider;
pub mod relay;
pub mod server;
pub mod session;
pub mod turn;
