#![deny(missing_docs)]
//! Wasabi Relay Bot
//!
//! A Telegram bot that keeps user files in a Wasabi (S3-compatible) bucket,
//! one namespace per user, and hands them back either as documents or as
//! time-limited pre-signed links.

/// Telegram bot implementation
pub mod bot;
/// Configuration management
pub mod config;
/// Per-user file relay between the chat and the object store
pub mod relay;
/// Telegram runtime entrypoint
pub mod runner;
/// Storage layer (Wasabi/S3)
pub mod storage;
/// In-memory doubles for the store and the chat transport
pub mod testing;
pub mod utils;
