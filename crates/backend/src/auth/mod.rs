//! Authentication module for session-backed JWT auth.
//!
//! This module provides:
//! - Email/password sign-up with email verification, sign-in and password reset
//! - Google and GitHub OAuth login
//! - Database sessions referenced by JWTs, with sliding refresh
//! - `require_auth` and `require_admin` middleware for protecting routes

pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod oauth;
pub mod password;
pub mod session;
pub mod types;

pub use middleware::{require_admin, require_auth};
