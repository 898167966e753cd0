pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod realtime;
pub mod reporting;
pub mod scanning;
