use axum::{
    middleware as axum_middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::auth::middleware::auth_middleware;
use crate::auth::rate_limit::rate_limit_middleware;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public credential routes (rate limited)
    let limited_routes = Router::new()
        .route("/register", post(handlers::auth::register))
        .route("/login", post(handlers::auth::login))
        .route("/register/referral", post(handlers::referral::register_with_referral))
        .layer(axum_middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ));

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/token/refresh", post(handlers::auth::refresh_token))
        .route("/token/verify", post(handlers::auth::verify_token));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        // Users
        .route("/users/me", get(handlers::account::get_profile))
        .route("/users", get(handlers::account::list_users))
        .route("/users/:id", patch(handlers::account::update_user))
        // Articles
        .route(
            "/articles",
            get(handlers::article::list_articles).post(handlers::article::create_article),
        )
        .route(
            "/articles/:id",
            get(handlers::article::get_article)
                .put(handlers::article::update_article)
                .patch(handlers::article::patch_article)
                .delete(handlers::article::delete_article),
        )
        // Referral
        .route(
            "/referral-codes",
            get(handlers::referral::list_codes).post(handlers::referral::create_code),
        )
        .route(
            "/referral-codes/:id",
            get(handlers::referral::get_code).delete(handlers::referral::delete_code),
        )
        .route("/referral/by-email", get(handlers::referral::get_code_by_email))
        .route("/referrals/:referrer_id", get(handlers::referral::list_referrals))
        .layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(limited_routes)
        .merge(public_routes)
        .merge(protected_routes)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        extract::connect_info::MockConnectInfo,
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::auth::password::PasswordHasher;
    use crate::config::AppConfig;
    use crate::db::{MemoryStore, Store};
    use crate::{build_app, AppState};

    fn test_state(config: AppConfig) -> (Arc<AppState>, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let state = AppState::new(config, store.clone(), PasswordHasher::for_tests(), None);
        (Arc::new(state), store)
    }

    /// The app as seen from a client connecting from `peer`.
    fn app_from(state: Arc<AppState>, peer: &str) -> Router {
        let peer: SocketAddr = peer.parse().unwrap();
        build_app(state).layer(MockConnectInfo(peer))
    }

    fn test_app() -> (Router, Arc<dyn Store>) {
        let (state, store) = test_state(AppConfig::for_tests());
        (app_from(state, "192.0.2.1:40000"), store)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        send_request(app, request).await
    }

    async fn send_request(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn register_and_login(app: &Router, username: &str) -> String {
        let (status, _) = send(
            app,
            Method::POST,
            "/api/v1/register",
            None,
            Some(json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "password": "password123"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            app,
            Method::POST,
            "/api/v1/login",
            None,
            Some(json!({ "username": username, "password": "password123" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["access"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn test_register_response_hides_password() {
        let (app, _) = test_app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/register",
            None,
            Some(json!({
                "username": "testuser",
                "email": "testuser@example.com",
                "password": "password123"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["username"], "testuser");
        let text = body.to_string();
        assert!(!text.contains("password"));
        assert!(!text.contains("argon2"));
    }

    #[tokio::test]
    async fn test_duplicate_email_reports_field() {
        let (app, _) = test_app();
        register_and_login(&app, "existinguser").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/register",
            None,
            Some(json!({
                "username": "newuser",
                "email": "existinguser@example.com",
                "password": "password123"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(body["error"]["fields"]["email"].is_array());
        assert!(body["error"]["fields"]["username"].is_null());
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let (app, _) = test_app();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let (app, _) = test_app();
        register_and_login(&app, "testuser").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/login",
            None,
            Some(json!({ "username": "testuser", "password": "wrongpassword" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "Invalid Credentials");
    }

    #[tokio::test]
    async fn test_protected_routes_require_access_token() {
        let (app, _) = test_app();
        let (status, _) = send(&app, Method::GET, "/api/v1/users/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        register_and_login(&app, "testuser").await;
        let (_, tokens) = send(
            &app,
            Method::POST,
            "/api/v1/login",
            None,
            Some(json!({ "username": "testuser", "password": "password123" })),
        )
        .await;
        let refresh = tokens["refresh"].as_str().unwrap();

        let (status, _) = send(&app, Method::GET, "/api/v1/users/me", Some(refresh), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let access = tokens["access"].as_str().unwrap();
        let (status, body) = send(&app, Method::GET, "/api/v1/users/me", Some(access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "testuser");
    }

    #[tokio::test]
    async fn test_token_refresh_and_verify() {
        let (app, _) = test_app();
        register_and_login(&app, "testuser").await;
        let (_, tokens) = send(
            &app,
            Method::POST,
            "/api/v1/login",
            None,
            Some(json!({ "username": "testuser", "password": "password123" })),
        )
        .await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/token/refresh",
            None,
            Some(json!({ "refresh": tokens["refresh"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["access"].is_string());

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/token/verify",
            None,
            Some(json!({ "token": "not-a-token" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_article_lifecycle() {
        let (app, _) = test_app();
        let author = register_and_login(&app, "author").await;
        let reader = register_and_login(&app, "reader").await;

        let (status, article) = send(
            &app,
            Method::POST,
            "/api/v1/articles",
            Some(&author),
            Some(json!({ "title": "Article 1", "content": "Content 1" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let uri = format!("/api/v1/articles/{}", article["id"]);

        let (status, body) = send(&app, Method::GET, "/api/v1/articles", Some(&reader), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        let (status, body) = send(
            &app,
            Method::PATCH,
            &uri,
            Some(&reader),
            Some(json!({ "title": "Hijacked" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");

        let (status, body) = send(
            &app,
            Method::PUT,
            &uri,
            Some(&author),
            Some(json!({ "title": "Edited", "content": "New body" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Edited");

        let (status, _) = send(&app, Method::DELETE, &uri, Some(&author), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, Method::GET, &uri, Some(&author), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_referral_flow() {
        let (app, store) = test_app();
        let alice = register_and_login(&app, "alice").await;
        let intruder = register_and_login(&app, "mallory").await;

        let (status, code) = send(&app, Method::POST, "/api/v1/referral-codes", Some(&alice), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(code["is_active"], true);
        let code_value = code["code"].as_str().unwrap().to_string();
        let code_uri = format!("/api/v1/referral-codes/{}", code["id"]);

        let (status, body) = send(&app, Method::POST, "/api/v1/referral-codes", Some(&alice), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["fields"]["non_field_errors"].is_array());

        let (status, body) = send(
            &app,
            Method::GET,
            "/api/v1/referral/by-email?email=alice@example.com",
            Some(&intruder),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], code_value.as_str());

        let (status, _) = send(&app, Method::DELETE, &code_uri, Some(&intruder), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/register/referral",
            None,
            Some(json!({ "code": code_value, "username": "bob", "password": "pw123" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["username"], "bob");
        assert_eq!(body["referral"]["referrer_id"], code["user_id"]);

        let bob = store.find_user_by_username("bob").await.unwrap().unwrap();
        let referrer_id = code["user_id"].as_i64().unwrap();
        let referrals = store.list_referrals(referrer_id).await.unwrap();
        assert_eq!(referrals.len(), 1);
        assert_eq!(referrals[0].referee_id, bob.id);

        let (status, body) = send(
            &app,
            Method::GET,
            &format!("/api/v1/referrals/{}", referrer_id),
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        let (status, body) = send(&app, Method::DELETE, &code_uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], code_value.as_str());
    }

    #[tokio::test]
    async fn test_unknown_referral_code_creates_nothing() {
        let (app, store) = test_app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/register/referral",
            None,
            Some(json!({ "code": "NOSUCHCODE", "username": "bob", "password": "pw123" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_CODE");
        assert!(store.find_user_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_email_login_not_shadowed_by_username() {
        let (app, _) = test_app();
        register_and_login(&app, "victim").await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/register",
            None,
            Some(json!({
                "username": "victim@example.com",
                "email": "squatter@example.com",
                "password": "squatter-password"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/login",
            None,
            Some(json!({ "login": "victim@example.com", "password": "password123" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, me) = send(
            &app,
            Method::GET,
            "/api/v1/users/me",
            body["access"].as_str(),
            None,
        )
        .await;
        assert_eq!(me["username"], "victim");
    }

    fn login_request(forwarded_for: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/login")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(forwarded_for) = forwarded_for {
            builder = builder.header("X-Forwarded-For", forwarded_for);
        }
        builder
            .body(Body::from(
                json!({ "login": "nobody", "password": "password123" }).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_rate_limited_per_peer() {
        let mut config = AppConfig::for_tests();
        config.rate_limit_max_requests = 2;
        let (state, _) = test_state(config);
        let first = app_from(state.clone(), "198.51.100.1:50000");
        let second = app_from(state, "198.51.100.2:50000");

        for i in 0..2 {
            let forwarded = format!("203.0.113.{}", i);
            let (status, _) = send_request(&first, login_request(Some(&forwarded))).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }

        // Rotating the forwarded header does not buy a fresh budget.
        let response = first
            .clone()
            .oneshot(login_request(Some("203.0.113.99")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "RATE_LIMITED");

        // Another client keeps its own budget.
        let (status, _) = send_request(&second, login_request(None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_forwarded_header_keys_limiter_behind_proxy() {
        let mut config = AppConfig::for_tests();
        config.rate_limit_max_requests = 1;
        config.trust_proxy_headers = true;
        let (state, _) = test_state(config);
        let proxy = app_from(state, "127.0.0.1:8000");

        let (status, _) = send_request(&proxy, login_request(Some("203.0.113.1"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send_request(&proxy, login_request(Some("203.0.113.2"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send_request(&proxy, login_request(Some("203.0.113.1"))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_bad_path_and_query_use_error_envelope() {
        let (app, _) = test_app();
        let token = register_and_login(&app, "testuser").await;

        let (status, body) = send(&app, Method::GET, "/api/v1/articles/abc", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");

        let (status, body) =
            send(&app, Method::GET, "/api/v1/articles?limit=abc", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");

        let (status, body) = send(&app, Method::GET, "/api/v1/referral/by-email", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(body["error"]["fields"]["email"].is_array());
    }
}
