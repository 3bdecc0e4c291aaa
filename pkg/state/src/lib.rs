pub mod bridge;
pub mod client;

pub use bridge::{StateBlob, WorkspaceStateBridge, restore, save};
pub use client::StateStore;
