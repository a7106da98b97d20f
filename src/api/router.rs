//! API router.
//!
//! Everything except `/auth/*` and `/health` sits behind the bearer-token
//! middleware. Both groups share the access-log layer and a permissive CORS
//! policy for the web client.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;

/// 16 MB: base64 overhead over the 10 MB decoded audio cap.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Build the full application router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost
/// layer). Endpoint handlers use `State<ApiContext>` (provided via
/// `with_state`).
///
/// NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
pub fn api_router(ctx: ApiContext) -> Router {
    // Protected routes. Layers run bottom-up:
    //   Extension (outermost) → Auth → Access log (innermost) → Handler
    let protected = Router::new()
        .route(
            "/patients",
            get(endpoints::patients::list).post(endpoints::patients::create),
        )
        .route("/patients/search", get(endpoints::patients::search))
        .route("/patients/:id", get(endpoints::patients::get))
        .route(
            "/soap-notes",
            get(endpoints::soap_notes::list).post(endpoints::soap_notes::create),
        )
        .route(
            "/soap-notes/:id",
            get(endpoints::soap_notes::get)
                .patch(endpoints::soap_notes::update)
                .delete(endpoints::soap_notes::delete),
        )
        .route(
            "/soap-notes/:id/status",
            patch(endpoints::soap_notes::update_status),
        )
        .route(
            "/soap-notes/patient/:patient_id",
            get(endpoints::soap_notes::by_patient),
        )
        .route("/icd10/search", get(endpoints::icd10::search))
        .route("/icd10/code/:code", get(endpoints::icd10::lookup))
        .route("/icd10/validate/:code", get(endpoints::icd10::validate))
        .route("/icd10/seed", post(endpoints::icd10::seed))
        .route(
            "/transcription/transcribe",
            post(endpoints::transcription::transcribe),
        )
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::auth::require_auth))
        .layer(axum::Extension(ctx.clone()));

    // Unprotected: account entry points and the liveness probe.
    let unprotected = Router::new()
        .route("/auth/register", post(endpoints::auth::register))
        .route("/auth/login", post(endpoints::auth::login))
        .route("/auth/forgot-password", post(endpoints::auth::forgot_password))
        .route("/auth/reset-password", post(endpoints::auth::reset_password))
        .route(
            "/auth/request-reset-code",
            post(endpoints::auth::request_reset_code),
        )
        .route(
            "/auth/verify-reset-code",
            post(endpoints::auth::verify_reset_code),
        )
        .route(
            "/auth/reset-password-with-code",
            post(endpoints::auth::reset_password_with_code),
        )
        .route("/health", get(endpoints::health::check))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::Extension(ctx));

    Router::new()
        .merge(protected)
        .merge(unprotected)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use regex::Regex;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::auth::JwtKeys;
    use crate::config::Config;
    use crate::db::repository;
    use crate::db::sqlite::probe_trigram_index;
    use crate::db::Database;
    use crate::icd::CodeResolver;
    use crate::mailer::MockMailer;
    use crate::state::AppState;
    use crate::transcription::{MockTranscriber, SpeechTranscriber};

    struct TestApp {
        ctx: ApiContext,
        mailer: Arc<MockMailer>,
        _dir: tempfile::TempDir,
    }

    fn test_config(data_dir: &std::path::Path) -> Config {
        Config {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            data_dir: data_dir.to_path_buf(),
            jwt_secret: "router-test-secret".to_string(),
            jwt_ttl_secs: 3600,
            icd: None,
            icd_token_refresh: Duration::from_secs(3000),
            speech: None,
            mail: None,
            keepalive: None,
        }
    }

    fn test_app_with_speech(speech: Option<Arc<dyn SpeechTranscriber>>) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let db = Database::init(&config.db_path()).unwrap();
        let trigram = {
            let conn = db.connect().unwrap();
            probe_trigram_index(&conn)
        };
        let mailer = Arc::new(MockMailer::new());
        let state = AppState {
            jwt: JwtKeys::new(config.jwt_secret.as_bytes(), config.jwt_ttl_secs),
            resolver: CodeResolver::new(db.clone(), None, trigram),
            authority: None,
            speech,
            mailer: mailer.clone(),
            db,
            config,
        };
        TestApp {
            ctx: ApiContext::new(Arc::new(state)),
            mailer,
            _dir: dir,
        }
    }

    fn test_app() -> TestApp {
        test_app_with_speech(Some(Arc::new(MockTranscriber::new(
            "patient reports a dry cough and mild fever",
        ))))
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header("Authorization", format!("Bearer {t}"));
        }
        match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &TestApp, req: Request<Body>) -> axum::response::Response {
        api_router(app.ctx.clone()).oneshot(req).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    /// Register a clinician, returning (token, user_id).
    async fn register_user(app: &TestApp, email: &str) -> (String, Uuid) {
        let response = send(
            app,
            request(
                "POST",
                "/auth/register",
                None,
                Some(json!({
                    "email": email,
                    "password": "correct-horse-9",
                    "firstName": "Alice",
                    "lastName": "Reyes",
                })),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let token = json["accessToken"].as_str().unwrap().to_string();
        let user_id = Uuid::parse_str(json["user"]["id"].as_str().unwrap()).unwrap();
        (token, user_id)
    }

    async fn create_patient(app: &TestApp, token: &str, mrn: &str) -> Uuid {
        let response = send(
            app,
            request(
                "POST",
                "/patients",
                Some(token),
                Some(json!({
                    "mrn": mrn,
                    "firstName": "Ben",
                    "lastName": "Okafor",
                    "dateOfBirth": "1981-03-14",
                })),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        Uuid::parse_str(json["id"].as_str().unwrap()).unwrap()
    }

    async fn create_note(app: &TestApp, token: &str, patient_id: &Uuid) -> Value {
        let response = send(
            app,
            request(
                "POST",
                "/soap-notes",
                Some(token),
                Some(json!({
                    "patientId": patient_id.to_string(),
                    "symptoms": "Cough for three days",
                    "examination": "Chest clear",
                    "diagnosis": "Viral URTI",
                    "management": "Rest and fluids",
                })),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await
    }

    // ── Auth and middleware ──────────────────────────────────

    #[tokio::test]
    async fn health_does_not_require_auth() {
        let app = test_app();
        let response = send(&app, request("GET", "/health", None, None)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn protected_routes_require_auth() {
        let app = test_app();

        let response = send(&app, request("GET", "/patients", None, None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(&app, request("GET", "/patients", Some("garbage"), None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn authenticated_responses_are_not_cacheable() {
        let app = test_app();
        let (token, _) = register_user(&app, "cache@clinic.test").await;

        let response = send(&app, request("GET", "/patients", Some(&token), None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("Cache-Control").unwrap(), "no-store");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = test_app();
        let response = send(&app, request("GET", "/nonexistent", None, None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let app = test_app();
        register_user(&app, "taken@clinic.test").await;

        let response = send(
            &app,
            request(
                "POST",
                "/auth/register",
                None,
                Some(json!({
                    "email": "Taken@clinic.test",
                    "password": "another-pass-1",
                    "firstName": "Bob",
                    "lastName": "Lau",
                })),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let app = test_app();
        let response = send(
            &app,
            request(
                "POST",
                "/auth/register",
                None,
                Some(json!({
                    "email": "short@clinic.test",
                    "password": "short",
                    "firstName": "A",
                    "lastName": "B",
                })),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn login_failures_share_one_message() {
        let app = test_app();
        register_user(&app, "login@clinic.test").await;

        // Wrong password and unknown email produce the same body.
        let wrong_pass = send(
            &app,
            request(
                "POST",
                "/auth/login",
                None,
                Some(json!({"email": "login@clinic.test", "password": "wrong-pass-123"})),
            ),
        )
        .await;
        assert_eq!(wrong_pass.status(), StatusCode::UNAUTHORIZED);
        let wrong_pass = body_json(wrong_pass).await;

        let unknown = send(
            &app,
            request(
                "POST",
                "/auth/login",
                None,
                Some(json!({"email": "nobody@clinic.test", "password": "wrong-pass-123"})),
            ),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
        let unknown = body_json(unknown).await;

        assert_eq!(wrong_pass["message"], "Invalid credentials");
        assert_eq!(unknown["message"], wrong_pass["message"]);
    }

    #[tokio::test]
    async fn deactivated_account_cannot_log_in() {
        let app = test_app();
        let (_, user_id) = register_user(&app, "inactive@clinic.test").await;

        {
            let conn = app.ctx.state.db.connect().unwrap();
            repository::set_user_active(&conn, &user_id, false).unwrap();
        }

        let response = send(
            &app,
            request(
                "POST",
                "/auth/login",
                None,
                Some(json!({"email": "inactive@clinic.test", "password": "correct-horse-9"})),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Account is deactivated");
    }

    #[tokio::test]
    async fn error_body_has_standard_shape() {
        let app = test_app();
        let (token, _) = register_user(&app, "shape@clinic.test").await;

        let response = send(
            &app,
            request("GET", "/patients/not-a-uuid", Some(&token), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["statusCode"], 400);
        assert_eq!(json["error"], "Bad Request");
        assert!(json["message"].as_str().unwrap().contains("Invalid patient ID"));
        assert!(json["timestamp"].as_str().is_some());
    }

    // ── Password reset flows ─────────────────────────────────

    fn code_from_mail(body: &str) -> String {
        Regex::new(r"\b(\d{6})\b")
            .unwrap()
            .captures(body)
            .expect("mail should contain a 6-digit code")[1]
            .to_string()
    }

    #[tokio::test]
    async fn forgot_password_answers_generically() {
        let app = test_app();
        register_user(&app, "forgot@clinic.test").await;

        let known = send(
            &app,
            request(
                "POST",
                "/auth/forgot-password",
                None,
                Some(json!({"email": "forgot@clinic.test"})),
            ),
        )
        .await;
        assert_eq!(known.status(), StatusCode::OK);

        let unknown = send(
            &app,
            request(
                "POST",
                "/auth/forgot-password",
                None,
                Some(json!({"email": "nobody@clinic.test"})),
            ),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::OK);

        // Only the real account got mail.
        assert_eq!(app.mailer.sent().len(), 1);
        assert_eq!(app.mailer.sent()[0].to, "forgot@clinic.test");
    }

    #[tokio::test]
    async fn reset_token_flow_sets_new_password() {
        let app = test_app();
        register_user(&app, "token-reset@clinic.test").await;

        send(
            &app,
            request(
                "POST",
                "/auth/forgot-password",
                None,
                Some(json!({"email": "token-reset@clinic.test"})),
            ),
        )
        .await;

        let mail = &app.mailer.sent()[0];
        let token = Regex::new(r"Reset token: (\S+)")
            .unwrap()
            .captures(&mail.body)
            .unwrap()[1]
            .to_string();

        let response = send(
            &app,
            request(
                "POST",
                "/auth/reset-password",
                None,
                Some(json!({"token": token, "newPassword": "brand-new-pass-1"})),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        // New password works, old one does not.
        let login = send(
            &app,
            request(
                "POST",
                "/auth/login",
                None,
                Some(json!({"email": "token-reset@clinic.test", "password": "brand-new-pass-1"})),
            ),
        )
        .await;
        assert_eq!(login.status(), StatusCode::OK);

        let old = send(
            &app,
            request(
                "POST",
                "/auth/login",
                None,
                Some(json!({"email": "token-reset@clinic.test", "password": "correct-horse-9"})),
            ),
        )
        .await;
        assert_eq!(old.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bogus_reset_token_is_rejected() {
        let app = test_app();
        let response = send(
            &app,
            request(
                "POST",
                "/auth/reset-password",
                None,
                Some(json!({"token": "nonsense", "newPassword": "whatever-pass-1"})),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reset_code_flow_sets_new_password() {
        let app = test_app();
        register_user(&app, "code-reset@clinic.test").await;

        send(
            &app,
            request(
                "POST",
                "/auth/request-reset-code",
                None,
                Some(json!({"email": "code-reset@clinic.test"})),
            ),
        )
        .await;

        let code = code_from_mail(&app.mailer.sent()[0].body);

        let verify = send(
            &app,
            request(
                "POST",
                "/auth/verify-reset-code",
                None,
                Some(json!({"email": "code-reset@clinic.test", "code": code})),
            ),
        )
        .await;
        assert_eq!(verify.status(), StatusCode::OK);
        assert_eq!(body_json(verify).await["valid"], true);

        let reset = send(
            &app,
            request(
                "POST",
                "/auth/reset-password-with-code",
                None,
                Some(json!({
                    "email": "code-reset@clinic.test",
                    "code": code,
                    "newPassword": "coded-new-pass-1",
                })),
            ),
        )
        .await;
        assert_eq!(reset.status(), StatusCode::OK);

        let login = send(
            &app,
            request(
                "POST",
                "/auth/login",
                None,
                Some(json!({"email": "code-reset@clinic.test", "password": "coded-new-pass-1"})),
            ),
        )
        .await;
        assert_eq!(login.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn five_wrong_guesses_invalidate_the_code() {
        let app = test_app();
        register_user(&app, "burned@clinic.test").await;

        send(
            &app,
            request(
                "POST",
                "/auth/request-reset-code",
                None,
                Some(json!({"email": "burned@clinic.test"})),
            ),
        )
        .await;

        let code = code_from_mail(&app.mailer.sent()[0].body);
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..5 {
            let response = send(
                &app,
                request(
                    "POST",
                    "/auth/verify-reset-code",
                    None,
                    Some(json!({"email": "burned@clinic.test", "code": wrong})),
                ),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        // The correct code is now useless, for verification and for resets.
        let verify = send(
            &app,
            request(
                "POST",
                "/auth/verify-reset-code",
                None,
                Some(json!({"email": "burned@clinic.test", "code": code})),
            ),
        )
        .await;
        assert_eq!(verify.status(), StatusCode::BAD_REQUEST);

        let reset = send(
            &app,
            request(
                "POST",
                "/auth/reset-password-with-code",
                None,
                Some(json!({
                    "email": "burned@clinic.test",
                    "code": code,
                    "newPassword": "never-applied-1",
                })),
            ),
        )
        .await;
        assert_eq!(reset.status(), StatusCode::BAD_REQUEST);
    }

    // ── Patients ─────────────────────────────────────────────

    #[tokio::test]
    async fn patient_create_get_roundtrip() {
        let app = test_app();
        let (token, _) = register_user(&app, "pat@clinic.test").await;
        let patient_id = create_patient(&app, &token, "MRN-1001").await;

        let response = send(
            &app,
            request("GET", &format!("/patients/{patient_id}"), Some(&token), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["mrn"], "MRN-1001");
        assert_eq!(json["firstName"], "Ben");
        assert_eq!(json["dateOfBirth"], "1981-03-14");
    }

    #[tokio::test]
    async fn duplicate_mrn_conflicts() {
        let app = test_app();
        let (token, _) = register_user(&app, "dup@clinic.test").await;
        create_patient(&app, &token, "MRN-2002").await;

        let response = send(
            &app,
            request(
                "POST",
                "/patients",
                Some(&token),
                Some(json!({"mrn": "MRN-2002", "firstName": "X", "lastName": "Y"})),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn missing_patient_is_404() {
        let app = test_app();
        let (token, _) = register_user(&app, "miss@clinic.test").await;

        let response = send(
            &app,
            request(
                "GET",
                &format!("/patients/{}", Uuid::new_v4()),
                Some(&token),
                None,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn patient_list_is_paginated() {
        let app = test_app();
        let (token, _) = register_user(&app, "page@clinic.test").await;
        for i in 0..3 {
            create_patient(&app, &token, &format!("MRN-3{i:03}")).await;
        }

        let response = send(
            &app,
            request("GET", "/patients?page=1&limit=2", Some(&token), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["data"].as_array().unwrap().len(), 2);
        assert_eq!(json["meta"]["total"], 3);
        assert_eq!(json["meta"]["totalPages"], 2);
        assert_eq!(json["meta"]["hasNextPage"], true);
        assert_eq!(json["meta"]["hasPreviousPage"], false);
    }

    #[tokio::test]
    async fn patient_search_matches_mrn() {
        let app = test_app();
        let (token, _) = register_user(&app, "search@clinic.test").await;
        create_patient(&app, &token, "MRN-4004").await;
        create_patient(&app, &token, "MRN-5005").await;

        let response = send(
            &app,
            request("GET", "/patients/search?q=4004", Some(&token), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["meta"]["total"], 1);
        assert_eq!(json["data"][0]["mrn"], "MRN-4004");
    }

    #[tokio::test]
    async fn empty_search_query_is_rejected() {
        let app = test_app();
        let (token, _) = register_user(&app, "empty@clinic.test").await;

        let response = send(
            &app,
            request("GET", "/patients/search?q=", Some(&token), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // ── SOAP notes ───────────────────────────────────────────

    #[tokio::test]
    async fn note_for_unknown_patient_is_404_and_writes_nothing() {
        let app = test_app();
        let (token, _) = register_user(&app, "orphan@clinic.test").await;

        let response = send(
            &app,
            request(
                "POST",
                "/soap-notes",
                Some(&token),
                Some(json!({
                    "patientId": Uuid::new_v4().to_string(),
                    "symptoms": "should never persist",
                })),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Patient not found");

        let list = send(&app, request("GET", "/soap-notes", Some(&token), None)).await;
        let list = body_json(list).await;
        assert_eq!(list["meta"]["total"], 0);
    }

    #[tokio::test]
    async fn content_edit_marks_note_and_appends_history() {
        let app = test_app();
        let (token, _) = register_user(&app, "editor@clinic.test").await;
        let patient_id = create_patient(&app, &token, "MRN-6006").await;
        let note = create_note(&app, &token, &patient_id).await;
        let note_id = note["id"].as_str().unwrap();
        assert_eq!(note["wasEdited"], false);

        let response = send(
            &app,
            request(
                "PATCH",
                &format!("/soap-notes/{note_id}"),
                Some(&token),
                Some(json!({
                    "symptoms": "Cough for five days",
                    "diagnosis": "Bacterial bronchitis",
                })),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["wasEdited"], true);
        assert_eq!(json["lastEditedBy"], "Alice Reyes");

        let history = json["editHistory"].as_array().unwrap();
        assert_eq!(history.len(), 1);

        let changes = history[0]["changes"].as_array().unwrap();
        let fields: Vec<&str> = changes
            .iter()
            .map(|c| c["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["symptoms", "diagnosis"]);
        assert_eq!(changes[0]["old"], "Cough for three days");
        assert_eq!(changes[0]["new"], "Cough for five days");
    }

    #[tokio::test]
    async fn second_edit_appends_second_entry() {
        let app = test_app();
        let (token, _) = register_user(&app, "editor2@clinic.test").await;
        let patient_id = create_patient(&app, &token, "MRN-7007").await;
        let note = create_note(&app, &token, &patient_id).await;
        let note_id = note["id"].as_str().unwrap();

        send(
            &app,
            request(
                "PATCH",
                &format!("/soap-notes/{note_id}"),
                Some(&token),
                Some(json!({"symptoms": "First revision"})),
            ),
        )
        .await;

        let response = send(
            &app,
            request(
                "PATCH",
                &format!("/soap-notes/{note_id}"),
                Some(&token),
                Some(json!({"management": "Second revision"})),
            ),
        )
        .await;
        let json = body_json(response).await;

        let history = json["editHistory"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1]["changes"][0]["field"], "management");
    }

    #[tokio::test]
    async fn identical_content_edit_changes_nothing() {
        let app = test_app();
        let (token, _) = register_user(&app, "noop@clinic.test").await;
        let patient_id = create_patient(&app, &token, "MRN-8008").await;
        let note = create_note(&app, &token, &patient_id).await;
        let note_id = note["id"].as_str().unwrap();

        let response = send(
            &app,
            request(
                "PATCH",
                &format!("/soap-notes/{note_id}"),
                Some(&token),
                Some(json!({"symptoms": "Cough for three days"})),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["wasEdited"], false);
        assert_eq!(json["editHistory"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn status_change_is_not_an_edit() {
        let app = test_app();
        let (token, _) = register_user(&app, "status@clinic.test").await;
        let patient_id = create_patient(&app, &token, "MRN-9009").await;
        let note = create_note(&app, &token, &patient_id).await;
        let note_id = note["id"].as_str().unwrap();

        let response = send(
            &app,
            request(
                "PATCH",
                &format!("/soap-notes/{note_id}/status"),
                Some(&token),
                Some(json!({"status": "finalized"})),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "finalized");
        assert_eq!(json["wasEdited"], false);
        assert_eq!(json["editHistory"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn note_list_filters_by_status() {
        let app = test_app();
        let (token, _) = register_user(&app, "filter@clinic.test").await;
        let patient_id = create_patient(&app, &token, "MRN-1100").await;

        let note = create_note(&app, &token, &patient_id).await;
        create_note(&app, &token, &patient_id).await;

        send(
            &app,
            request(
                "PATCH",
                &format!("/soap-notes/{}/status", note["id"].as_str().unwrap()),
                Some(&token),
                Some(json!({"status": "finalized"})),
            ),
        )
        .await;

        let response = send(
            &app,
            request("GET", "/soap-notes?status=finalized", Some(&token), None),
        )
        .await;
        let json = body_json(response).await;
        assert_eq!(json["meta"]["total"], 1);
        assert_eq!(json["data"][0]["status"], "finalized");
    }

    #[tokio::test]
    async fn notes_by_patient_are_scoped() {
        let app = test_app();
        let (token, _) = register_user(&app, "scoped@clinic.test").await;
        let first = create_patient(&app, &token, "MRN-1201").await;
        let second = create_patient(&app, &token, "MRN-1202").await;

        create_note(&app, &token, &first).await;
        create_note(&app, &token, &first).await;
        create_note(&app, &token, &second).await;

        let response = send(
            &app,
            request(
                "GET",
                &format!("/soap-notes/patient/{first}"),
                Some(&token),
                None,
            ),
        )
        .await;
        let json = body_json(response).await;
        assert_eq!(json["meta"]["total"], 2);

        let response = send(
            &app,
            request(
                "GET",
                &format!("/soap-notes/patient/{}", Uuid::new_v4()),
                Some(&token),
                None,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn note_delete_is_permanent() {
        let app = test_app();
        let (token, _) = register_user(&app, "delete@clinic.test").await;
        let patient_id = create_patient(&app, &token, "MRN-1300").await;
        let note = create_note(&app, &token, &patient_id).await;
        let note_id = note["id"].as_str().unwrap();

        let response = send(
            &app,
            request("DELETE", &format!("/soap-notes/{note_id}"), Some(&token), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(
            &app,
            request("GET", &format!("/soap-notes/{note_id}"), Some(&token), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(
            &app,
            request("DELETE", &format!("/soap-notes/{note_id}"), Some(&token), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // ── ICD-10 ───────────────────────────────────────────────

    #[tokio::test]
    async fn code_lookup_counts_usage() {
        let app = test_app();
        let (token, _) = register_user(&app, "icd@clinic.test").await;

        let response = send(&app, request("POST", "/icd10/seed", Some(&token), None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["seeded"].as_u64().unwrap() > 0);

        let first = send(&app, request("GET", "/icd10/code/I10", Some(&token), None)).await;
        assert_eq!(first.status(), StatusCode::OK);
        let first = body_json(first).await;
        assert_eq!(first["code"], "I10");
        assert_eq!(first["usageCount"], 1);

        let second = send(&app, request("GET", "/icd10/code/i10", Some(&token), None)).await;
        let second = body_json(second).await;
        assert_eq!(second["usageCount"], 2);
    }

    #[tokio::test]
    async fn reseeding_skips_existing() {
        let app = test_app();
        let (token, _) = register_user(&app, "reseed@clinic.test").await;

        let first = body_json(send(&app, request("POST", "/icd10/seed", Some(&token), None)).await).await;
        let second = body_json(send(&app, request("POST", "/icd10/seed", Some(&token), None)).await).await;

        assert_eq!(second["seeded"], 0);
        assert_eq!(second["skipped"], first["seeded"]);
    }

    #[tokio::test]
    async fn code_search_orders_by_popularity() {
        let app = test_app();
        let (token, _) = register_user(&app, "order@clinic.test").await;
        send(&app, request("POST", "/icd10/seed", Some(&token), None)).await;

        // Bump one code so it outranks the other matches.
        for _ in 0..3 {
            send(&app, request("GET", "/icd10/code/M54.5", Some(&token), None)).await;
        }

        let response = send(
            &app,
            request("GET", "/icd10/search?q=pain", Some(&token), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let results = json.as_array().unwrap();
        assert!(results.len() >= 2);
        assert_eq!(results[0]["code"], "M54.5");
    }

    #[tokio::test]
    async fn unknown_code_without_authority_is_404() {
        let app = test_app();
        let (token, _) = register_user(&app, "unknown@clinic.test").await;

        let response = send(
            &app,
            request("GET", "/icd10/code/Q99.9", Some(&token), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn code_validation_checks_format_only() {
        let app = test_app();
        let (token, _) = register_user(&app, "valid@clinic.test").await;

        let response = send(
            &app,
            request("GET", "/icd10/validate/e11.9", Some(&token), None),
        )
        .await;
        let json = body_json(response).await;
        assert_eq!(json["code"], "E11.9");
        assert_eq!(json["valid"], true);

        let response = send(
            &app,
            request("GET", "/icd10/validate/banana", Some(&token), None),
        )
        .await;
        let json = body_json(response).await;
        assert_eq!(json["valid"], false);
    }

    // ── Transcription ────────────────────────────────────────

    #[tokio::test]
    async fn transcription_proxies_to_provider() {
        let app = test_app();
        let (token, _) = register_user(&app, "speech@clinic.test").await;

        let audio = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b"pretend-opus-bytes",
        );
        let response = send(
            &app,
            request(
                "POST",
                "/transcription/transcribe",
                Some(&token),
                Some(json!({"audio": audio, "mimeType": "audio/ogg"})),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["text"], "patient reports a dry cough and mild fever");
        assert!(json["confidence"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn transcription_rejects_bad_base64() {
        let app = test_app();
        let (token, _) = register_user(&app, "bad64@clinic.test").await;

        let response = send(
            &app,
            request(
                "POST",
                "/transcription/transcribe",
                Some(&token),
                Some(json!({"audio": "!!not-base64!!"})),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn transcription_without_provider_is_503() {
        let app = test_app_with_speech(None);
        let (token, _) = register_user(&app, "nospeech@clinic.test").await;

        let audio = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"bytes");
        let response = send(
            &app,
            request(
                "POST",
                "/transcription/transcribe",
                Some(&token),
                Some(json!({"audio": audio})),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn transcription_provider_failure_is_503() {
        let app = test_app_with_speech(Some(Arc::new(MockTranscriber::failing())));
        let (token, _) = register_user(&app, "downspeech@clinic.test").await;

        let audio = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"bytes");
        let response = send(
            &app,
            request(
                "POST",
                "/transcription/transcribe",
                Some(&token),
                Some(json!({"audio": audio})),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
