//! Pserve Common - Shared configuration types for the pserve download server

pub mod config;

pub use config::*;
