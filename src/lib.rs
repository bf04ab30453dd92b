//! # Pipenotify
//!
//! Relays Pipedrive CRM webhook events to Google Chat rooms for many tenants:
//! ingestion → durable job queue → rule matching → quiet-hours gate →
//! templating → Google Chat delivery with retry → delivery log.

pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod pipeline;
pub mod repositories;
pub mod server;
pub mod sweep;
pub mod telemetry;
pub mod webhook_verification;
pub mod worker;
pub use migration;
