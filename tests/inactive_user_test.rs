#[macro_use]
mod common;

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::{json, Value};

    use super::common;

    fn student() -> Value {
        json!({"name": "Ayush", "age": 21, "email": "ayush@gmail.com"})
    }

    #[actix_rt::test]
    async fn deactivated_jwt_user_is_rejected() {
        let state = common::state();
        let user = common::create_user(&state, "Ayush").await;
        let auth = common::bearer(&state, &user);
        state.users.set_active(user.id, false).await.unwrap();
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/students/")
            .insert_header(auth)
            .set_json(student())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["detail"], "User is inactive");
        assert_eq!(body["code"], "user_inactive");
    }

    #[actix_rt::test]
    async fn deactivated_token_user_is_rejected() {
        let state = common::state();
        let user = common::create_user(&state, "Ayush").await;
        let token = state
            .users
            .obtain_auth_token(&user.username, common::PASSWORD)
            .await
            .unwrap();
        state.users.set_active(user.id, false).await.unwrap();
        let app = test_app!(state);

        let req = test::TestRequest::get()
            .uri("/api/students/")
            .insert_header(("Authorization", format!("Token {}", token.key)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["detail"], "User inactive or deleted.");
    }

    #[actix_rt::test]
    async fn deactivated_session_user_becomes_anonymous() {
        let state = common::state();
        let user = common::create_user(&state, "Ayush").await;
        let users = state.users.clone();
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api-auth/login/")
            .set_json(json!({"username": "Ayush", "password": common::PASSWORD}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp
            .response()
            .cookies()
            .find(|c| c.name() == "sessionid")
            .expect("session cookie")
            .into_owned();

        users.set_active(user.id, false).await.unwrap();

        // Reads stay open to anonymous callers
        let req = test::TestRequest::get()
            .uri("/api/students/")
            .cookie(cookie.clone())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/api/students/")
            .cookie(cookie)
            .set_json(student())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["detail"], "Authentication credentials were not provided.");
    }

    #[actix_rt::test]
    async fn deactivated_user_cannot_log_in() {
        let state = common::state();
        let user = common::create_user(&state, "Ayush").await;
        state.users.set_active(user.id, false).await.unwrap();
        let app = test_app!(state);
        let credentials = json!({"username": "Ayush", "password": common::PASSWORD});

        let req = test::TestRequest::post()
            .uri("/gottoken/")
            .set_json(credentials.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(
            body["non_field_errors"],
            json!(["Unable to log in with provided credentials."])
        );

        let req = test::TestRequest::post()
            .uri("/api/token/")
            .set_json(credentials.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/api-auth/login/")
            .set_json(credentials)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
