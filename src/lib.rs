pub mod api;
pub mod clients;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod utils;
