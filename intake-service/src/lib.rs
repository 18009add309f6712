pub mod booking;
pub mod classifier;
pub mod config;
pub mod history;
pub mod server;
pub mod steps;
pub mod treatment;
