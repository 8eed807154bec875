pub mod api;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod platform;
pub mod server;
pub mod shutdown;
pub mod webhook;
pub mod workflow;
pub mod workspace;
