// Library exports for Launchkit process supervisor

pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod logs;
pub mod process;
