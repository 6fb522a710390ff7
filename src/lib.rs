pub mod api;
pub mod cli;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod server;
pub mod statement;
pub mod types;

pub use engine::{ExecutionEngine, ExecutionRequest, ExecutionResult};
pub use router::StatementRouter;
pub use server::{app, AppState};
pub use statement::{StatementDefinition, StatementStore};
