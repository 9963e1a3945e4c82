//! Configuration and error types shared by every engine

pub mod config;
pub mod error;
