//! Aviation intelligence hub: ingests aircraft telemetry and voice-derived
//! signals from multiple heterogeneous sources, normalizes them into a
//! single message model, tracks aircraft and military HFGCS traffic,
//! detects EAM/SKYKING transmissions, and fans out a filtered, batched
//! event stream to many concurrent subscribers.

pub mod adapters;
pub mod aircraft_tracker;
pub mod broadcast_hub;
pub mod commands;
pub mod config;
pub mod eam;
pub mod errors;
pub mod hfgcs;
pub mod hub_events;
pub mod log_format;
pub mod message;
pub mod message_processor;
pub mod metrics;
pub mod persistence;
pub mod schema;
pub mod source_manager;
pub mod web;

use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/");

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
