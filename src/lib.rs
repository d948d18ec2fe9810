pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod oauth;
pub mod state;
pub mod upstream;
