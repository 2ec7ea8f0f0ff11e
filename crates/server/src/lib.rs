pub mod api;
pub mod audit_factory;
pub mod config;
pub mod error;
pub mod provider_factory;
pub mod state_factory;
