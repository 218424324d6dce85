#![deny(missing_docs)]
//! scoredesk
//!
//! A Telegram bot for a theatre sound desk: static resource links plus a
//! password-guarded registry of score spreadsheets.

/// Telegram bot implementation
pub mod bot;
/// Configuration management
pub mod config;
/// Telegram runtime wiring
pub mod runner;
/// Spreadsheet title lookup (Google Sheets)
pub mod sheets;
/// Registry persistence (JSON file)
pub mod storage;
/// Shared helpers
pub mod utils;
