//! Shared infrastructure for the Storefront services
//!
//! This crate provides the pieces every service needs: the PostgreSQL
//! connection pool, the Redis client wrapper, and the error types both
//! surface.

pub mod cache;
pub mod database;
pub mod error;
