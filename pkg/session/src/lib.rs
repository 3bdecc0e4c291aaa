pub mod client;
pub mod provider;

pub use client::HubApiClient;
pub use provider::{CurrentUser, SessionError, SessionProvider};
