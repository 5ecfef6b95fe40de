pub mod admin;
pub mod error;
pub mod health;
pub mod metrics;
pub mod requests;
pub mod ws;
