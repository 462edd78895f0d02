use actix_web::{HttpResponse, Result};

use crate::models::HealthResponse;
use crate::utils;

pub mod accounts;
pub mod auth;
pub mod students;
pub mod viewset;

#[cfg(test)]
mod health_test;

/// Health check endpoint
pub async fn health_check() -> Result<HttpResponse> {
    Ok(utils::response::success_response(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    }))
}
