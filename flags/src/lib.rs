pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod engine;
pub mod flag_definitions;
pub mod handlers;
pub mod overrides;
pub mod postgres;
pub mod prometheus;
pub mod requests;
pub mod rollout;
pub mod router;
pub mod server;
pub mod store;
pub mod test_utils;
