pub mod auth;
pub mod client;
pub mod mapper;

pub use auth::InstallationTokens;
pub use client::GitHubGateway;
