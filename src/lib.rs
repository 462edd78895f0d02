pub mod auth;
pub mod config;
pub mod database;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod permissions;
pub mod routes;
pub mod serializers;
pub mod services;
pub mod throttle;
pub mod utils;

// Note: avoid glob re-exports to prevent ambiguous symbol re-exports
// Consumers should reference items through their module paths, e.g.:
// `student_api::models::Student` or `student_api::routes::AppState`.
