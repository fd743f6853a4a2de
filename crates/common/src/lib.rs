//! Common utilities shared across the resource server crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (structural parsing, temporal checks, constants)
pub mod jwt;
