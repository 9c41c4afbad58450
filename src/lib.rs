pub mod app;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod search;
pub mod service;
pub mod sync;

pub use app::{AppState, Window};
pub use db::Database;
pub use error::{NotepadError, Result};
pub use service::NoteService;
