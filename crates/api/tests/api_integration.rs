//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::AppState;
use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use event_store::InMemoryEventStore;
use fulfillment::{ApprovalPolicy, InMemoryPaymentProcessor};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn setup_with_state(
    policy: ApprovalPolicy,
) -> (axum::Router, Arc<AppState<InMemoryEventStore>>) {
    let state = api::create_state_with_payments(
        InMemoryEventStore::new(),
        InMemoryPaymentProcessor::with_policy(policy),
        &Config::default(),
    )
    .await
    .unwrap();
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

async fn setup() -> axum::Router {
    setup_with_state(ApprovalPolicy::AlwaysApprove).await.0
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    send_with_headers(app, method, uri, body, &[]).await
}

async fn send_with_headers(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn add_widget(app: &axum::Router, customer_id: u64, quantity: i64) -> Value {
    let (status, line) = send(
        app,
        "POST",
        &format!("/cart/{customer_id}/items"),
        Some(json!({
            "product_id": 7,
            "quantity": quantity,
            "unit_price": 1000,
            "display_name": "Widget"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    line
}

fn checkout_body(customer_id: u64) -> Value {
    json!({
        "customer_id": customer_id,
        "shipping_address": "1 Main St",
        "payment_method": "card",
        "card": { "number": "4242 4242 4242 4242", "cvc": "123" }
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = setup().await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

mod cart {
    use super::*;

    #[tokio::test]
    async fn test_add_twice_merges_into_one_line() {
        let app = setup().await;
        add_widget(&app, 5, 1).await;
        add_widget(&app, 5, 1).await;

        let (status, cart) = send(&app, "GET", "/cart/5", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(cart["items"].as_array().unwrap().len(), 1);
        assert_eq!(cart["items"][0]["quantity"], 2);
        assert_eq!(cart["total_items"], 2);
        assert_eq!(cart["total_price"], 2000);
    }

    #[tokio::test]
    async fn test_invalid_quantity_is_bad_request() {
        let app = setup().await;

        let (status, json) = send(
            &app,
            "POST",
            "/cart/5/items",
            Some(json!({
                "product_id": 7,
                "quantity": 0,
                "unit_price": 1000,
                "display_name": "Widget"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "validation");
    }

    #[tokio::test]
    async fn test_overflowing_total_is_bad_request() {
        let app = setup().await;
        let pricey = |product_id: u64, quantity: i64| {
            json!({
                "product_id": product_id,
                "quantity": quantity,
                "unit_price": i64::MAX / 2,
                "display_name": "Pricey"
            })
        };

        let (status, json) = send(&app, "POST", "/cart/5/items", Some(pricey(1, 3))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "validation");

        let (status, _) = send(&app, "POST", "/cart/5/items", Some(pricey(1, 1))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(&app, "POST", "/cart/5/items", Some(pricey(2, 2))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, cart) = send(&app, "GET", "/cart/5", None).await;
        assert_eq!(cart["total_items"], 1);
        assert_eq!(cart["total_price"], i64::MAX / 2);
    }

    #[tokio::test]
    async fn test_update_and_remove_item() {
        let app = setup().await;
        let line = add_widget(&app, 5, 1).await;
        let item_id = line["id"].as_u64().unwrap();

        let (status, updated) = send(
            &app,
            "PUT",
            &format!("/cart/5/items/{item_id}"),
            Some(json!({ "quantity": 4 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["quantity"], 4);

        let (status, _) = send(&app, "DELETE", &format!("/cart/5/items/{item_id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, cart) = send(&app, "GET", "/cart/5", None).await;
        assert!(cart["items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_to_zero_deletes() {
        let app = setup().await;
        let line = add_widget(&app, 5, 2).await;
        let item_id = line["id"].as_u64().unwrap();

        let (status, _) = send(
            &app,
            "PUT",
            &format!("/cart/5/items/{item_id}"),
            Some(json!({ "quantity": 0 })),
        )
        .await;

        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, cart) = send(&app, "GET", "/cart/5", None).await;
        assert_eq!(cart["total_items"], 0);
    }

    #[tokio::test]
    async fn test_other_customers_line_is_not_found() {
        let app = setup().await;
        let line = add_widget(&app, 5, 1).await;
        let item_id = line["id"].as_u64().unwrap();

        let (status, _) = send(&app, "DELETE", &format!("/cart/6/items/{item_id}"), None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, cart) = send(&app, "GET", "/cart/5", None).await;
        assert_eq!(cart["total_items"], 1);
    }

    #[tokio::test]
    async fn test_clear_cart() {
        let app = setup().await;
        add_widget(&app, 5, 3).await;

        let (status, _) = send(&app, "DELETE", "/cart/5", None).await;

        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, cart) = send(&app, "GET", "/cart/5", None).await;
        assert_eq!(cart["total_items"], 0);
    }
}

mod checkout {
    use super::*;

    #[tokio::test]
    async fn test_approved_checkout_confirms_and_clears_cart() {
        let app = setup().await;
        add_widget(&app, 5, 2).await;

        let (status, json) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["outcome"], "confirmed");
        assert_eq!(json["order"]["status"], "confirmed");
        assert_eq!(json["order"]["payment_status"], "completed");
        assert_eq!(json["order"]["total_cents"], 2000);
        assert_eq!(json["payment"]["amount"], 2000);
        assert_eq!(json["payment"]["card_last4"], "4242");
        assert_eq!(json["cart_cleared"], true);

        let (_, cart) = send(&app, "GET", "/cart/5", None).await;
        assert!(cart["items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_card_number_never_echoed() {
        let app = setup().await;
        add_widget(&app, 5, 1).await;

        let (_, json) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;

        let body = json.to_string();
        assert!(!body.contains("4242 4242 4242 4242"));
        assert!(!body.contains("\"cvc\""));
    }

    #[tokio::test]
    async fn test_declined_checkout_is_payment_required() {
        let (app, _) = setup_with_state(ApprovalPolicy::AlwaysDecline).await;
        add_widget(&app, 5, 2).await;

        let (status, json) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;

        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(json["outcome"], "declined");
        assert!(json["reason"].as_str().is_some());
        assert_eq!(json["order"]["status"], "pending");
        assert_eq!(json["order"]["payment_status"], "failed");
        assert_eq!(json["order"]["total_cents"], 2000);

        let (_, cart) = send(&app, "GET", "/cart/5", None).await;
        assert_eq!(cart["items"].as_array().unwrap().len(), 1);
        assert_eq!(cart["items"][0]["quantity"], 2);
    }

    #[tokio::test]
    async fn test_empty_cart_is_bad_request() {
        let app = setup().await;

        let (status, json) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().is_some());

        let (_, orders) = send(&app, "GET", "/customers/5/orders", None).await;
        assert!(orders.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_total_cart_is_bad_request() {
        let app = setup().await;
        let (status, _) = send(
            &app,
            "POST",
            "/cart/5/items",
            Some(json!({
                "product_id": 9,
                "quantity": 1,
                "unit_price": 0,
                "display_name": "Free sample"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, json) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "validation");
        let (_, orders) = send(&app, "GET", "/customers/5/orders", None).await;
        assert!(orders.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idempotency_key_header_replays() {
        let app = setup().await;
        add_widget(&app, 5, 1).await;
        let headers = [("Idempotency-Key", "checkout-1")];

        let (first_status, first) =
            send_with_headers(&app, "POST", "/orders", Some(checkout_body(5)), &headers).await;
        let (second_status, second) =
            send_with_headers(&app, "POST", "/orders", Some(checkout_body(5)), &headers).await;

        assert_eq!(first_status, StatusCode::CREATED);
        assert_eq!(second_status, StatusCode::CREATED);
        assert_eq!(first["order"]["id"], second["order"]["id"]);
        assert_eq!(first["saga_id"], second["saga_id"]);

        let (_, orders) = send(&app, "GET", "/customers/5/orders", None).await;
        assert_eq!(orders.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_idempotency_key_body_field() {
        let app = setup().await;
        add_widget(&app, 5, 1).await;
        let mut body = checkout_body(5);
        body["idempotency_key"] = json!("checkout-2");

        let (_, first) = send(&app, "POST", "/orders", Some(body.clone())).await;
        let (_, second) = send(&app, "POST", "/orders", Some(body)).await;

        assert_eq!(first["order"]["id"], second["order"]["id"]);
    }

    #[tokio::test]
    async fn test_saga_is_inspectable() {
        let app = setup().await;
        add_widget(&app, 5, 1).await;
        let (_, placed) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;
        let saga_id = placed["saga_id"].as_str().unwrap();

        let (status, saga) = send(&app, "GET", &format!("/sagas/{saga_id}"), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(saga["saga_type"], "Checkout");
        assert_eq!(saga["state"], "Completed");
        assert_eq!(saga["order_id"], placed["order"]["id"]);
        assert_eq!(saga["completed_steps"].as_array().unwrap().len(), 4);
    }
}

mod orders {
    use super::*;

    async fn place_confirmed(app: &axum::Router, customer_id: u64) -> String {
        add_widget(app, customer_id, 2).await;
        let (status, json) = send(app, "POST", "/orders", Some(checkout_body(customer_id))).await;
        assert_eq!(status, StatusCode::CREATED);
        json["order"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_get_order() {
        let app = setup().await;
        let order_id = place_confirmed(&app, 5).await;

        let (status, order) = send(&app, "GET", &format!("/orders/{order_id}"), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(order["customer_id"], 5);
        assert_eq!(order["items"][0]["product_id"], 7);
        assert_eq!(order["items"][0]["quantity"], 2);
        assert_eq!(order["items"][0]["line_total_cents"], 2000);
        assert_eq!(order["shipping_address"], "1 Main St");
    }

    #[tokio::test]
    async fn test_get_nonexistent_order() {
        let app = setup().await;
        let id = uuid::Uuid::new_v4();

        let (status, _) = send(&app, "GET", &format!("/orders/{id}"), None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_order_id_format() {
        let app = setup().await;

        let (status, _) = send(&app, "GET", "/orders/not-a-uuid", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_orders_for_customer() {
        let app = setup().await;
        place_confirmed(&app, 5).await;
        place_confirmed(&app, 5).await;
        place_confirmed(&app, 6).await;

        let (status, orders) = send(&app, "GET", "/customers/5/orders", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(orders.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_status_advances() {
        let app = setup().await;
        let order_id = place_confirmed(&app, 5).await;

        let (status, order) = send(
            &app,
            "PATCH",
            &format!("/orders/{order_id}/status"),
            Some(json!({ "status": "processing" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(order["status"], "processing");
    }

    #[tokio::test]
    async fn test_ship_with_tracking_number() {
        let app = setup().await;
        let order_id = place_confirmed(&app, 5).await;
        let uri = format!("/orders/{order_id}/status");
        send(&app, "PATCH", &uri, Some(json!({ "status": "processing" }))).await;

        let (status, order) = send(
            &app,
            "PATCH",
            &uri,
            Some(json!({ "status": "shipped", "tracking_number": "1Z999" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(order["status"], "shipped");
    }

    #[tokio::test]
    async fn test_unknown_status_is_bad_request() {
        let app = setup().await;
        let order_id = place_confirmed(&app, 5).await;

        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/orders/{order_id}/status"),
            Some(json!({ "status": "archived" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, order) = send(&app, "GET", &format!("/orders/{order_id}"), None).await;
        assert_eq!(order["status"], "confirmed");
    }

    #[tokio::test]
    async fn test_disallowed_transition_is_conflict() {
        let app = setup().await;
        let order_id = place_confirmed(&app, 5).await;

        let (status, json) = send(
            &app,
            "PATCH",
            &format!("/orders/{order_id}/status"),
            Some(json!({ "status": "pending" })),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["kind"], "conflict");
    }

    #[tokio::test]
    async fn test_unknown_payment_status_is_bad_request() {
        let app = setup().await;
        let order_id = place_confirmed(&app, 5).await;

        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/orders/{order_id}/payment"),
            Some(json!({ "payment_status": "settled" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_payments_for_order() {
        let app = setup().await;
        let order_id = place_confirmed(&app, 5).await;

        let (status, payments) =
            send(&app, "GET", &format!("/orders/{order_id}/payments"), None).await;

        assert_eq!(status, StatusCode::OK);
        let payments = payments.as_array().unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0]["status"], "completed");
        assert!(payments[0]["transaction_id"].as_str().unwrap().starts_with("txn_"));
    }

    #[tokio::test]
    async fn test_payments_for_unknown_order() {
        let app = setup().await;
        let id = uuid::Uuid::new_v4();

        let (status, _) = send(&app, "GET", &format!("/orders/{id}/payments"), None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

mod payments {
    use super::*;

    #[tokio::test]
    async fn test_retry_after_decline_confirms() {
        let (app, state) = setup_with_state(ApprovalPolicy::AlwaysDecline).await;
        add_widget(&app, 5, 2).await;
        let (status, declined) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        let order_id = declined["order"]["id"].as_str().unwrap();

        state
            .coordinator
            .payments()
            .set_policy(ApprovalPolicy::AlwaysApprove)
            .await;
        let (status, retried) = send(
            &app,
            "POST",
            &format!("/orders/{order_id}/payments"),
            Some(json!({ "card": { "number": "4000 0000 0000 0077", "cvc": "321" } })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(retried["outcome"], "confirmed");
        assert_eq!(retried["order"]["status"], "confirmed");
        assert_eq!(retried["order"]["payment_status"], "completed");

        let (_, payments) = send(&app, "GET", &format!("/orders/{order_id}/payments"), None).await;
        assert_eq!(payments.as_array().unwrap().len(), 2);

        let (_, cart) = send(&app, "GET", "/cart/5", None).await;
        assert!(cart["items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_on_paid_order_is_conflict() {
        let app = setup().await;
        add_widget(&app, 5, 1).await;
        let (_, placed) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;
        let order_id = placed["order"]["id"].as_str().unwrap();

        let (status, _) = send(
            &app,
            "POST",
            &format!("/orders/{order_id}/payments"),
            Some(json!({})),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        let (_, payments) = send(&app, "GET", &format!("/orders/{order_id}/payments"), None).await;
        assert_eq!(payments.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_payment_lookups() {
        let app = setup().await;
        add_widget(&app, 5, 2).await;
        let (_, placed) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;
        let payment_id = placed["payment"]["id"].as_str().unwrap();
        add_widget(&app, 6, 1).await;
        send(&app, "POST", "/orders", Some(checkout_body(6))).await;

        let (status, payment) = send(&app, "GET", &format!("/payments/{payment_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payment["id"], payment_id);
        assert_eq!(payment["amount"], 2000);
        assert_eq!(payment["status"], "completed");
        assert_eq!(payment["card_last4"], "4242");

        let (status, mine) = send(&app, "GET", "/customers/5/payments", None).await;
        assert_eq!(status, StatusCode::OK);
        let mine = mine.as_array().unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0]["id"], payment_id);

        let (status, none) = send(&app, "GET", "/customers/7/payments", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(none.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_payment() {
        let app = setup().await;
        let id = uuid::Uuid::new_v4();

        let (status, _) = send(&app, "GET", &format!("/payments/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "GET", "/payments/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_restart_keeps_carts_and_payments() {
        let store = InMemoryEventStore::new();
        let start = |store: InMemoryEventStore| async move {
            let state = api::create_state_with_payments(
                store,
                InMemoryPaymentProcessor::with_policy(ApprovalPolicy::AlwaysApprove),
                &Config::default(),
            )
            .await
            .unwrap();
            api::create_app(state, get_metrics_handle())
        };

        let app = start(store.clone()).await;
        add_widget(&app, 5, 2).await;
        let (_, placed) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;
        let order_id = placed["order"]["id"].as_str().unwrap().to_string();
        add_widget(&app, 6, 3).await;
        drop(app);

        let app = start(store).await;
        let (_, cart) = send(&app, "GET", "/cart/6", None).await;
        assert_eq!(cart["total_items"], 3);
        let (_, payments) = send(&app, "GET", "/customers/5/payments", None).await;
        assert_eq!(payments.as_array().unwrap().len(), 1);

        let (status, refund) =
            send(&app, "POST", &format!("/orders/{order_id}/refund"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(refund["payment"]["status"], "refunded");
    }

    #[tokio::test]
    async fn test_gateway_outage_is_service_unavailable() {
        let (app, state) = setup_with_state(ApprovalPolicy::AlwaysApprove).await;
        add_widget(&app, 5, 1).await;
        state.coordinator.payments().set_fail_on_charge(true).await;

        let (status, _) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (_, orders) = send(&app, "GET", "/customers/5/orders", None).await;
        assert_eq!(orders[0]["status"], "pending");
        assert_eq!(orders[0]["payment_status"], "pending");
        let (_, cart) = send(&app, "GET", "/cart/5", None).await;
        assert_eq!(cart["total_items"], 1);
    }
}

mod refunds {
    use super::*;

    #[tokio::test]
    async fn test_refund_then_second_refund_conflicts() {
        let app = setup().await;
        add_widget(&app, 5, 2).await;
        let (_, placed) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;
        let order_id = placed["order"]["id"].as_str().unwrap();

        let (status, refunded) =
            send(&app, "POST", &format!("/orders/{order_id}/refund"), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(refunded["payment"]["status"], "refunded");
        assert_eq!(refunded["payment"]["amount"], 2000);
        assert_eq!(refunded["order"]["payment_status"], "refunded");

        let (status, json) = send(&app, "POST", &format!("/orders/{order_id}/refund"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["kind"], "conflict");
    }

    #[tokio::test]
    async fn test_refund_without_payment_is_conflict() {
        let (app, _) = setup_with_state(ApprovalPolicy::AlwaysDecline).await;
        add_widget(&app, 5, 1).await;
        let (_, declined) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;
        let order_id = declined["order"]["id"].as_str().unwrap();

        let (status, _) = send(&app, "POST", &format!("/orders/{order_id}/refund"), None).await;

        assert_eq!(status, StatusCode::CONFLICT);
        let (_, order) = send(&app, "GET", &format!("/orders/{order_id}"), None).await;
        assert_eq!(order["payment_status"], "failed");
    }

    #[tokio::test]
    async fn test_refund_unknown_order_is_not_found() {
        let app = setup().await;
        let id = uuid::Uuid::new_v4();

        let (status, _) = send(&app, "POST", &format!("/orders/{id}/refund"), None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

mod sagas {
    use super::*;

    #[tokio::test]
    async fn test_unknown_saga_is_not_found() {
        let app = setup().await;
        let id = uuid::Uuid::new_v4();

        let (status, _) = send(&app, "GET", &format!("/sagas/{id}"), None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reconcile_finishes_unclearable_checkout() {
        let (app, state) = setup_with_state(ApprovalPolicy::AlwaysApprove).await;
        add_widget(&app, 5, 1).await;
        state.coordinator.carts().set_fail_on_clear(true).await;

        let (status, placed) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(placed["cart_cleared"], false);
        let saga_id = placed["saga_id"].as_str().unwrap();
        let (_, saga) = send(&app, "GET", &format!("/sagas/{saga_id}"), None).await;
        assert_eq!(saga["state"], "Running");

        state.coordinator.carts().set_fail_on_clear(false).await;
        let (status, report) = send(&app, "POST", "/sagas/reconcile", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["completed"], 1);
        let (_, saga) = send(&app, "GET", &format!("/sagas/{saga_id}"), None).await;
        assert_eq!(saga["state"], "Completed");
        let (_, cart) = send(&app, "GET", "/cart/5", None).await;
        assert_eq!(cart["total_items"], 0);
    }

    #[tokio::test]
    async fn test_resume_terminal_saga_is_unchanged() {
        let app = setup().await;
        add_widget(&app, 5, 1).await;
        let (_, placed) = send(&app, "POST", "/orders", Some(checkout_body(5))).await;
        let saga_id = placed["saga_id"].as_str().unwrap();

        let (status, saga) = send(&app, "POST", &format!("/sagas/{saga_id}/resume"), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(saga["state"], "Completed");
    }
}
