//! Generic model viewset actions, mounted per record kind by
//! [`crate::routes::register_viewset`].

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;

use crate::services::ModelService;
use crate::utils::error::AppError;
use crate::utils::{response, PaginationParams};

pub async fn list<S: ModelService>(
    service: web::Data<Arc<S>>,
    query: web::Query<PaginationParams>,
) -> Result<HttpResponse, AppError> {
    let items = service.list(&query).await?;
    Ok(response::success_response(items))
}

pub async fn create<S: ModelService>(
    service: web::Data<Arc<S>>,
    body: web::Json<S::Input>,
) -> Result<HttpResponse, AppError> {
    let item = service.create(body.into_inner()).await?;
    Ok(response::created_response(item))
}

pub async fn retrieve<S: ModelService>(
    service: web::Data<Arc<S>>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let item = service.get(path.into_inner()).await?;
    Ok(response::success_response(item))
}

pub async fn update<S: ModelService>(
    service: web::Data<Arc<S>>,
    path: web::Path<i64>,
    body: web::Json<S::Input>,
) -> Result<HttpResponse, AppError> {
    let item = service.update(path.into_inner(), body.into_inner(), false).await?;
    Ok(response::success_response(item))
}

pub async fn partial_update<S: ModelService>(
    service: web::Data<Arc<S>>,
    path: web::Path<i64>,
    body: web::Json<S::Input>,
) -> Result<HttpResponse, AppError> {
    let item = service.update(path.into_inner(), body.into_inner(), true).await?;
    Ok(response::success_response(item))
}

pub async fn destroy<S: ModelService>(
    service: web::Data<Arc<S>>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    service.delete(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// Fallback for verbs a route does not handle
pub async fn method_not_allowed(req: HttpRequest) -> Result<HttpResponse, AppError> {
    Err(AppError::MethodNotAllowed(req.method().to_string()))
}
