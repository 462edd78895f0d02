#[cfg(test)]
mod tests {
    use super::super::*;
    use actix_web::{test, web, App};

    #[actix_rt::test]
    async fn health_check_returns_healthy() {
        let app = test::init_service(App::new().route("/health", web::get().to(health_check))).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
