//! Real-time sync relay for organization task boards.
//!
//! REST mutations are authorized through the [`authz`] cascade, persisted in
//! the [`store`], and fanned out by the [`hub`] to every WebSocket connection
//! of the same organization.

pub mod api;
pub mod app;
pub mod auth;
pub mod authz;
pub mod config;
pub mod cors;
pub mod db;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod store;
pub mod validation;
pub mod ws;
