pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod logging;
pub mod teamsl;
pub mod utils;
