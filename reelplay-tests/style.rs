//! Style Enforcement Tests
//!
//! Scans the production sources of every workspace crate for patterns clippy
//! does not reject on its own.

#[path = "style/production_code.rs"]
mod production_code;
