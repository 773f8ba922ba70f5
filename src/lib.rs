pub mod admin;
pub mod app;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod rate_limit;
pub mod store;
pub mod validate;
