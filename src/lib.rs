pub mod actions;
pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod exit;
pub mod logs;
pub mod metrics;
pub mod platform;
pub mod rules;
pub mod scan;
pub mod ui;
pub mod update;
pub mod whitelist;
