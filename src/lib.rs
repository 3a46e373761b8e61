// Library exports for DeanHomes
// This allows integration tests and external code to use the marketplace modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod listings;
pub mod payments;
pub mod routes;
pub mod state;
pub mod storage;
pub mod users;
pub mod validation;
