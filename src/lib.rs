//! Produce marketplace backend: order placement with price snapshots and
//! realtime seller alerts, listing broadcasts and comment notifications over
//! websockets.

pub mod auth;
pub mod comments;
pub mod config;
pub mod error;
pub mod links;
pub mod listings;
pub mod messages;
pub mod models;
pub mod notify;
pub mod orders;
pub mod room;
pub mod routes;
pub mod seed;
pub mod server;
pub mod store;
