use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::services::{AccountService, ModelService};
use crate::utils::error::AppError;
use crate::utils::{response, PaginationParams};

/// `GET /accounts/`
pub async fn account_list(
    accounts: web::Data<Arc<AccountService>>,
    query: web::Query<PaginationParams>,
) -> Result<HttpResponse, AppError> {
    Ok(response::success_response(accounts.list(&query).await?))
}
