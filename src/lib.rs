pub mod config;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;
pub mod state;
