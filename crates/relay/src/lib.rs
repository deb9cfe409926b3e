// courier-relay library entry point.

pub mod app;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod sequencer;
pub mod store;
pub mod validation;
pub mod ws;
