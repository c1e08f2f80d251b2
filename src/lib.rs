pub mod agi;
pub mod app;
pub mod call;
pub mod config;
pub mod error;
pub mod event;
pub mod preflight;
pub mod version;
