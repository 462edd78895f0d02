#[macro_use]
mod common;

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::{json, Value};

    use super::common;

    fn aniket() -> Value {
        json!({"name": "Aniket Tripathi", "age": 20, "email": "test@gmail.com"})
    }

    #[actix_rt::test]
    async fn create_then_list_and_lookup() {
        let app = test_app!(common::state());

        let req = test::TestRequest::post()
            .uri("/studentapi/")
            .set_payload(aniket().to_string())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        assert_eq!(created["id"], 1);
        assert_eq!(created["email"], "test@gmail.com");

        let req = test::TestRequest::get().uri("/studentapi/").to_request();
        let all: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(all.as_array().unwrap().len(), 1);

        let req = test::TestRequest::get().uri("/studentapi/?id=1").to_request();
        let by_query: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(by_query["name"], "Aniket Tripathi");

        let req = test::TestRequest::get()
            .uri("/studentapi/")
            .set_payload(r#"{"id": 1}"#)
            .to_request();
        let by_body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(by_body, by_query);
    }

    #[actix_rt::test]
    async fn unknown_id_is_not_found() {
        let app = test_app!(common::state());
        let req = test::TestRequest::get().uri("/studentapi/?id=99").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"error": "Student not found"}));
    }

    #[actix_rt::test]
    async fn malformed_json_is_rejected() {
        let app = test_app!(common::state());
        let req = test::TestRequest::get()
            .uri("/studentapi/")
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid JSON or request: "));
    }

    #[actix_rt::test]
    async fn invalid_fields_report_field_errors() {
        let app = test_app!(common::state());
        let req = test::TestRequest::post()
            .uri("/studentapi/")
            .set_payload(json!({"name": "Ayush", "age": -1, "email": "nope"}).to_string())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["age"], json!(["Ensure this value is greater than or equal to 0."]));
        assert_eq!(body["email"], json!(["Enter a valid email address."]));
        assert!(body.get("name").is_none());

        let req = test::TestRequest::post()
            .uri("/studentapi/")
            .set_payload("{}")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["name"], json!(["This field is required."]));
    }

    #[actix_rt::test]
    async fn update_changes_only_given_fields() {
        let app = test_app!(common::state());
        let req = test::TestRequest::post()
            .uri("/studentapi/")
            .set_payload(aniket().to_string())
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::put()
            .uri("/studentapi/")
            .set_payload(r#"{"id": 1, "age": 21}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["age"], 21);
        assert_eq!(body["name"], "Aniket Tripathi");

        let req = test::TestRequest::put()
            .uri("/studentapi/")
            .set_payload(r#"{"age": 21}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn delete_then_lookup_fails() {
        let app = test_app!(common::state());
        let req = test::TestRequest::post()
            .uri("/studentapi/")
            .set_payload(aniket().to_string())
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::delete()
            .uri("/studentapi/")
            .set_payload(r#"{"id": 1}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"msg": "Data Deleted"}));

        let req = test::TestRequest::delete().uri("/studentapi/?id=1").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_rt::test]
    async fn other_methods_are_not_allowed() {
        let app = test_app!(common::state());
        let req = test::TestRequest::patch().uri("/studentapi/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"error": "Method not allowed"}));
    }

    #[actix_rt::test]
    async fn read_only_views_and_list_create() {
        let app = test_app!(common::state());

        let req = test::TestRequest::post()
            .uri("/students/")
            .set_json(aniket())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::get().uri("/stuinfo/").to_request();
        let all: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(all[0]["name"], "Aniket Tripathi");

        let req = test::TestRequest::get().uri("/stuinfo/1/").to_request();
        let one: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(one["id"], 1);

        let req = test::TestRequest::get().uri("/stuinfo/2/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/students/?page=1&limit=10").to_request();
        let page: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(page["pagination"]["total"], 1);
        assert_eq!(page["data"][0]["email"], "test@gmail.com");

        let req = test::TestRequest::delete().uri("/students/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[actix_rt::test]
    async fn security_headers_are_set() {
        let app = test_app!(common::state());
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(resp.headers().get("x-content-type-options").unwrap(), "nosniff");
    }
}
