pub mod admin;
pub mod app;
pub mod auth;
pub mod bootstrap;
pub mod cost;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod state;

pub use error::AppError;
pub use state::AppState;
