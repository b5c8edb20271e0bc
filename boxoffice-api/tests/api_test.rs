use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use boxoffice_api::{app, worker, AppState, Components};
use boxoffice_booking::{CoordinatorSettings, MockPaymentGateway};
use boxoffice_catalog::{PricingEngine, ShowCatalog};
use boxoffice_core::events::LogEventPublisher;
use boxoffice_core::repository::InMemoryBookingRepository;
use boxoffice_core::{ManualClock, PaymentStatus, SeatCategory, Show, ShowId, ShowLayout};
use boxoffice_hold::InMemoryLockManager;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: AppState,
    clock: Arc<ManualClock>,
    gateway: Arc<MockPaymentGateway>,
}

fn test_app() -> TestApp {
    test_app_with_threshold(5)
}

fn test_app_with_threshold(failure_threshold: usize) -> TestApp {
    let clock = Arc::new(ManualClock::at_epoch());
    let catalog = Arc::new(ShowCatalog::new());
    catalog
        .register(Show {
            id: ShowId::parse("SH1").unwrap(),
            title: "Playtime".to_string(),
            room: "Room 1".to_string(),
            starts_at: None,
            layout: ShowLayout::new(10, 14).unwrap().with_category("J", SeatCategory::Vip),
        })
        .unwrap();
    let pricing = Arc::new(PricingEngine::default());
    let bookings = Arc::new(InMemoryBookingRepository::new());
    let locks = Arc::new(InMemoryLockManager::new(
        catalog.clone(),
        pricing.clone(),
        bookings.clone(),
        clock.clone(),
    ));
    let gateway = Arc::new(MockPaymentGateway::new());

    let state = AppState::new(Components {
        catalog,
        pricing,
        locks,
        bookings,
        shows: None,
        db: None,
        gateway: gateway.clone(),
        publisher: Arc::new(LogEventPublisher),
        clock: clock.clone(),
        settings: CoordinatorSettings::default(),
        failure_threshold,
        reset_timeout: Duration::from_secs(60),
    })
    .unwrap();

    TestApp { router: app(state.clone()), state, clock, gateway }
}

impl TestApp {
    async fn send(&self, method: &str, uri: &str, body: Option<Value>, user: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", uri, Some(body), None).await
    }

    async fn acquire(&self, session: &str, seats: &[&str], ttl: Option<u64>) -> (StatusCode, Value) {
        let mut body = json!({ "showId": "SH1", "sessionId": session, "seats": seats });
        if let Some(ttl) = ttl {
            body["ttlSeconds"] = json!(ttl);
        }
        self.post("/v1/locks/acquire", body).await
    }

    async fn start_payment(&self, session: &str) -> (StatusCode, Value) {
        self.send(
            "POST",
            "/v1/payments/intent",
            Some(json!({ "showId": "SH1", "sessionId": session })),
            Some("user-42"),
        )
        .await
    }

    async fn confirm(&self, session: &str, seats: &[&str]) -> (StatusCode, Value) {
        self.post(
            "/v1/locks/confirm",
            json!({ "showId": "SH1", "sessionId": session, "seats": seats }),
        )
        .await
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = test_app();
    let (status, body) = app.send("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["shows"], 1);
}

#[tokio::test]
async fn test_select_pay_and_book() {
    let app = test_app();

    let (status, body) = app.acquire("S1", &["D5", "D6"], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["reservation"]["state"], "LOCKED");
    assert_eq!(body["reservation"]["totalAmount"], 1800);

    let (status, body) = app.start_payment("S1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paymentIntentId"].as_str().unwrap().starts_with("mock_pi_"));
    assert!(body["reservation"].get("userId").is_none());

    let (status, body) = app.confirm("S1", &["D5", "D6"]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["seats"], json!(["D5", "D6"]));
    let booking_id = body["bookingId"].as_str().unwrap().to_string();

    let (status, body) = app.send("GET", &format!("/v1/bookings/{}", booking_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bookingId"], booking_id.as_str());
    assert_eq!(body["status"], "CONFIRMED");

    let (_, body) = app.send("GET", "/v1/shows/SH1/seats", None, None).await;
    assert_eq!(body["seatMap"]["booked"], json!(["D5", "D6"]));
    assert_eq!(body["seatMap"]["free"], 138);

    let (_, metrics) = app.send("GET", "/health", None, None).await;
    assert_eq!(metrics["reservations"], 1);
    assert_eq!(app.state.metrics.bookings_confirmed.get(), 1);
}

#[tokio::test]
async fn test_overlapping_selection_conflicts() {
    let app = test_app();

    let (status, _) = app.acquire("S1", &["D5", "D6"], None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.acquire("S2", &["D5", "D7"], None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "CONFLICT");
    assert_eq!(body["alreadyLocked"], json!(["D5"]));
    assert_eq!(body["alreadyBooked"], json!([]));

    // Nothing of the failed batch was locked.
    let (_, body) = app.send("GET", "/v1/shows/SH1/seats", None, None).await;
    assert_eq!(body["seatMap"]["locked"], json!(["D5", "D6"]));
    assert_eq!(app.state.metrics.lock_conflicts.get(), 1);
}

#[tokio::test]
async fn test_expired_hold_goes_to_next_session() {
    let app = test_app();

    let (status, _) = app.acquire("S1", &["B1"], Some(1)).await;
    assert_eq!(status, StatusCode::OK);

    app.clock.advance(chrono::Duration::seconds(2));
    let freed = worker::run_maintenance(&app.state, chrono::Duration::hours(1)).await;
    assert_eq!(freed, 1);

    let (status, _) = app.acquire("S2", &["B1"], None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.confirm("S1", &["B1"]).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["kind"], "EXPIRED");
    assert_eq!(app.state.metrics.seats_expired.get(), 1);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let app = test_app();
    app.acquire("S1", &["C1", "C2"], None).await;

    let release = json!({ "showId": "SH1", "sessionId": "S1", "seats": ["C1"] });
    let (status, body) = app.post("/v1/locks/release", release.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], json!(["C1"]));

    let (status, body) = app.post("/v1/locks/release", release).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], json!([]));

    // Someone else's seat is silently skipped.
    let (status, body) = app
        .post("/v1/locks/release", json!({ "showId": "SH1", "sessionId": "S9", "seats": ["C2"] }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], json!([]));
}

#[tokio::test]
async fn test_confirm_of_foreign_seats_is_forbidden() {
    let app = test_app();
    app.acquire("S1", &["E1"], None).await;
    app.start_payment("S1").await;

    let (status, body) = app.confirm("S1", &["E1", "E2"]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "NOT_OWNER");
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let app = test_app();

    let (status, body) = app.acquire("S1", &["5D"], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "INVALID_INPUT");

    let (status, _) = app.acquire("S1", &["Z1"], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.acquire("S1", &["A1"], Some(0)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post("/v1/locks/acquire", json!({ "showId": "NOPE", "sessionId": "S1", "seats": ["A1"] }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NOT_FOUND");
}

#[tokio::test]
async fn test_payment_requires_user_id() {
    let app = test_app();
    app.acquire("S1", &["A1"], None).await;

    let (status, body) = app
        .post("/v1/payments/intent", json!({ "showId": "SH1", "sessionId": "S1" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_pending_payment_keeps_hold() {
    let app = test_app();
    app.gateway.set_default_status(PaymentStatus::RequiresAction);
    app.acquire("S1", &["A1"], None).await;
    app.start_payment("S1").await;

    let (status, body) = app
        .post("/v1/payments/complete", json!({ "showId": "SH1", "sessionId": "S1" }))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["paymentStatus"], "REQUIRES_ACTION");

    let (_, body) = app.send("GET", "/v1/reservations/SH1/S1", None, None).await;
    assert_eq!(body["reservation"]["state"], "AWAITING_PAYMENT");
}

#[tokio::test]
async fn test_failed_payment_webhook_releases_seats() {
    let app = test_app();
    app.acquire("S1", &["F3", "F4"], None).await;
    let (_, body) = app.start_payment("S1").await;
    let intent_id = body["paymentIntentId"].as_str().unwrap().to_string();
    app.gateway.set_status(&intent_id, PaymentStatus::Failed);

    let (status, body) = app
        .post(
            "/v1/webhooks/payments",
            json!({ "paymentIntentId": intent_id, "type": "payment_intent.payment_failed" }),
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["kind"], "PAYMENT_FAILED");

    let (_, body) = app.send("GET", "/v1/shows/SH1/seats", None, None).await;
    assert_eq!(body["seatMap"]["locked"], json!([]));

    let (status, _) = app.acquire("S2", &["F3"], None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_cancel_frees_seats() {
    let app = test_app();
    app.acquire("S1", &["G1"], None).await;

    let (status, body) = app
        .post("/v1/reservations/cancel", json!({ "showId": "SH1", "sessionId": "S1" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reservation"]["state"], "RELEASED");

    let (status, _) = app.acquire("S2", &["G1"], None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_circuit_breaker_opens_on_gateway_failures() {
    let app = test_app_with_threshold(1);
    app.acquire("S1", &["H1"], None).await;
    app.gateway.fail_next_create();

    let (status, body) = app.start_payment("S1").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "UPSTREAM_FAILURE");

    app.acquire("S2", &["H2"], None).await;
    let (status, body) = app.start_payment("S2").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "UNAVAILABLE");

    // Seat routes stay available while the breaker is open.
    let (status, _) = app.acquire("S3", &["H3"], None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_registered_show_and_price_changes() {
    let app = test_app();

    let show = json!({
        "id": "SH2",
        "title": "Mon Oncle",
        "room": "Room 2",
        "rows": 5,
        "columns": 8,
        "rowCategories": { "E": "premium" }
    });
    let (status, body) = app.post("/v1/admin/shows", show.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["show"]["layout"]["rowCategories"]["E"], "PREMIUM");

    let (status, _) = app.post("/v1/admin/shows", show).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post("/v1/admin/shows", json!({ "id": "SH2", "title": "Other", "rows": 3, "columns": 3 }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "DUPLICATE_SHOW");

    let held = json!({ "showId": "SH2", "sessionId": "S1", "seats": ["E1"] });
    let (_, body) = app.post("/v1/locks/acquire", held).await;
    assert_eq!(body["reservation"]["totalAmount"], 1200);

    let prices = json!({
        "currency": "EUR",
        "prices": { "STANDARD": 1000, "PREMIUM": 1500, "VIP": 2000 }
    });
    let (status, body) = app.send("PUT", "/v1/admin/prices", Some(prices), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prices"]["prices"]["PREMIUM"], 1500);

    // The existing hold keeps its price; new holds pay the new one.
    let (_, body) = app.send("GET", "/v1/reservations/SH2/S1", None, None).await;
    assert_eq!(body["reservation"]["totalAmount"], 1200);
    let (_, body) = app
        .post("/v1/locks/acquire", json!({ "showId": "SH2", "sessionId": "S2", "seats": ["E2"] }))
        .await;
    assert_eq!(body["reservation"]["totalAmount"], 1500);
}

#[tokio::test]
async fn test_negative_price_is_rejected() {
    let app = test_app();
    let prices = json!({
        "currency": "EUR",
        "prices": { "STANDARD": -1, "PREMIUM": 1500, "VIP": 2000 }
    });

    let (status, body) = app.send("PUT", "/v1/admin/prices", Some(prices), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "INVALID_INPUT");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquires_admit_one_session() {
    let app = Arc::new(test_app());

    let attempts = (0..8).map(|i| {
        let app = app.clone();
        tokio::spawn(async move { app.acquire(&format!("S{}", i), &["J7", "J8"], None).await.0 })
    });
    let statuses: Vec<StatusCode> = futures_util::future::join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count(), 7);
}

#[tokio::test]
async fn test_metrics_endpoint_exports_counters() {
    let app = test_app();
    app.acquire("S1", &["A1", "A2"], None).await;

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("boxoffice_seats_locked_total 2"));
}
