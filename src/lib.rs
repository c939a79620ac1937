// renku-project-sync - Renkuプロジェクト画面の状態同期コア

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod notebook;
pub mod poller;
pub mod recent;
pub mod request;
pub mod state;
pub mod tree;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{GatewayClient, ProjectClient};
pub use coordinator::ProjectCoordinator;
pub use error::{ApiError, ApiResult};
