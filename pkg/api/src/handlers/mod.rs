pub mod cleanup;
pub mod hub;
pub mod workspaces;
