pub mod api;
pub mod audit;
pub mod batch;
pub mod billing;
pub mod config;
pub mod core;
pub mod llm;
pub mod main_module;
pub mod security;
pub mod tests;

pub use crate::core::shared::state::AppState;
pub use crate::main_module::{build_router, run_server};
