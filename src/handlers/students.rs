use actix_web::http::{Method, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::serializers::StudentInput;
use crate::services::{ModelService, StudentService};
use crate::utils::error::AppError;
use crate::utils::{response, PaginationParams};

const NOT_FOUND: &str = "Student not found";

#[derive(Debug, Default, Deserialize)]
struct IdQuery {
    id: Option<String>,
}

/// Failures of the plain function view, rendered as `{"error": ...}`
#[derive(Debug)]
enum FunctionViewError {
    Request(String),
    App(AppError),
}

impl From<AppError> for FunctionViewError {
    fn from(err: AppError) -> Self {
        FunctionViewError::App(err)
    }
}

impl FunctionViewError {
    fn into_response(self) -> HttpResponse {
        match self {
            FunctionViewError::Request(reason) => response::error_response(
                &format!("Invalid JSON or request: {}", reason),
                StatusCode::BAD_REQUEST,
            ),
            FunctionViewError::App(AppError::NotFound) => {
                response::error_response(NOT_FOUND, StatusCode::NOT_FOUND)
            }
            FunctionViewError::App(AppError::Validation(errors)) => {
                response::json_response(errors, StatusCode::BAD_REQUEST)
            }
            FunctionViewError::App(AppError::Internal(message)) => {
                crate::utils::log_internal_error("student_api", &message, None);
                response::error_response("A server error occurred.", StatusCode::INTERNAL_SERVER_ERROR)
            }
            FunctionViewError::App(other) => {
                let status = actix_web::ResponseError::status_code(&other);
                response::error_response(&other.to_string(), status)
            }
        }
    }
}

/// An empty body counts as no body at all
fn parse_body(body: &[u8]) -> Result<Value, FunctionViewError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| FunctionViewError::Request(e.to_string()))
}

/// `id` from the query string, else from the JSON body
fn requested_id(req: &HttpRequest, body: &Value) -> Result<Option<i64>, FunctionViewError> {
    let query = web::Query::<IdQuery>::from_query(req.query_string())
        .map(web::Query::into_inner)
        .unwrap_or_default();

    let raw = match query.id {
        Some(id) => Value::String(id),
        None => body.get("id").cloned().unwrap_or(Value::Null),
    };

    match raw {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| FunctionViewError::Request(format!("id must be an integer, got {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| FunctionViewError::Request(format!("id must be an integer, got {:?}", s))),
        other => Err(FunctionViewError::Request(format!("id must be an integer, got {}", other))),
    }
}

fn student_input(body: Value) -> Result<StudentInput, FunctionViewError> {
    match body {
        Value::Object(_) => {
            serde_json::from_value(body).map_err(|e| FunctionViewError::Request(e.to_string()))
        }
        Value::Null => Ok(StudentInput::default()),
        _ => Err(FunctionViewError::Request("expected a JSON object".to_string())),
    }
}

async fn dispatch(
    req: &HttpRequest,
    body: &[u8],
    students: &StudentService,
) -> Result<HttpResponse, FunctionViewError> {
    let method = req.method().clone();
    if ![Method::GET, Method::POST, Method::PUT, Method::DELETE].contains(&method) {
        return Ok(response::error_response("Method not allowed", StatusCode::METHOD_NOT_ALLOWED));
    }

    let body = parse_body(body)?;
    let id = requested_id(req, &body)?;

    if method == Method::GET {
        return match id {
            Some(id) => Ok(response::success_response(students.get(id).await?)),
            None => Ok(response::success_response(
                students.list(&PaginationParams::default()).await?,
            )),
        };
    }

    if method == Method::POST {
        let created = students.create(student_input(body)?).await?;
        return Ok(response::created_response(created));
    }

    let id = id.ok_or_else(|| FunctionViewError::Request("id is required".to_string()))?;

    if method == Method::PUT {
        let updated = students.update(id, student_input(body)?, true).await?;
        return Ok(response::success_response(updated));
    }

    students.delete(id).await?;
    Ok(response::success_response(serde_json::json!({ "msg": "Data Deleted" })))
}

/// `/studentapi/`: one view for every verb, id taken from query or body
pub async fn student_api(
    req: HttpRequest,
    body: web::Bytes,
    students: web::Data<Arc<StudentService>>,
) -> HttpResponse {
    match dispatch(&req, &body, &students).await {
        Ok(resp) => resp,
        Err(err) => {
            log::debug!("{} /studentapi/ failed: {:?}", req.method(), err);
            err.into_response()
        }
    }
}

/// `GET /stuinfo/`
pub async fn student_list(students: web::Data<Arc<StudentService>>) -> HttpResponse {
    match students.list(&PaginationParams::default()).await {
        Ok(all) => response::success_response(all),
        Err(err) => FunctionViewError::App(err).into_response(),
    }
}

/// `GET /stuinfo/{id}/`
pub async fn student_detail(
    path: web::Path<i64>,
    students: web::Data<Arc<StudentService>>,
) -> HttpResponse {
    match students.get(path.into_inner()).await {
        Ok(student) => response::success_response(student),
        Err(err) => FunctionViewError::App(err).into_response(),
    }
}

/// `GET /students/`
pub async fn list_create_get(
    students: web::Data<Arc<StudentService>>,
    query: web::Query<PaginationParams>,
) -> Result<HttpResponse, AppError> {
    Ok(response::success_response(students.list(&query).await?))
}

/// `POST /students/`
pub async fn list_create_post(
    students: web::Data<Arc<StudentService>>,
    body: web::Json<StudentInput>,
) -> Result<HttpResponse, AppError> {
    let created = students.create(body.into_inner()).await?;
    Ok(response::created_response(created))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryDatabase;
    use actix_web::{test, App};
    use serde_json::json;

    macro_rules! app {
        () => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(Arc::new(StudentService::new(Arc::new(
                        InMemoryDatabase::new(),
                    )))))
                    .route("/studentapi/", web::route().to(student_api)),
            )
            .await
        };
    }

    #[actix_rt::test]
    async fn body_without_content_type_is_accepted() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/studentapi/")
            .set_payload(r#"{"name": "Aniket Tripathi", "age": 20, "email": "test@gmail.com"}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::get()
            .uri("/studentapi/")
            .set_payload(r#"{"id": 1}"#)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["name"], "Aniket Tripathi");
    }

    #[actix_rt::test]
    async fn non_integer_id_is_a_bad_request() {
        let app = app!();
        let req = test::TestRequest::get().uri("/studentapi/?id=abc").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid JSON or request:"));

        let req = test::TestRequest::get()
            .uri("/studentapi/")
            .set_json(json!({"id": [1]}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
