pub mod api;
pub mod config;
pub mod couriers;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod observability;
pub mod settings;
pub mod state;
pub mod store;
