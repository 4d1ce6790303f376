//! SAR Desk core: per-state SAR data, selection, and question answering.

pub mod aggregate;
pub mod broadcaster;
pub mod client;
pub mod config;
pub mod credentials;
pub mod data_store;
pub mod dataset;
pub mod error;
pub mod event;
pub mod extract;
pub mod format;
pub mod loader;
pub mod monitor;
pub mod resolver;
pub mod session;
pub mod types;
