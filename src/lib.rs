pub mod backfill;
pub mod config;
pub mod error;
pub mod espn;
pub mod export;
pub mod http_client;
pub mod logging;
pub mod ranking;
pub mod store;
pub mod team_identity;
