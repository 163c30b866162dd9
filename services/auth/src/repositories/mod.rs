//! Persistence contracts consumed by the auth core

pub mod user;

pub use user::{PgUserRepository, UserRepository};
