use reqwest::StatusCode;
use serde_json::{json, Value as JsonValue};

use binflow_core::WorkerId;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Build app (same router as prod), but bind to an ephemeral port.
        let app = binflow_api::app::build_app();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn post(
    client: &reqwest::Client,
    base_url: &str,
    path: &str,
    body: JsonValue,
) -> (StatusCode, JsonValue) {
    let res = client
        .post(format!("{base_url}{path}"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = res.status();
    let body = res.json().await.unwrap_or(JsonValue::Null);
    (status, body)
}

async fn get(client: &reqwest::Client, base_url: &str, path: &str) -> (StatusCode, JsonValue) {
    let res = client.get(format!("{base_url}{path}")).send().await.unwrap();
    let status = res.status();
    let body = res.json().await.unwrap_or(JsonValue::Null);
    (status, body)
}

/// Create a two-line order and return (order_id, line item ids).
async fn create_order(client: &reqwest::Client, base_url: &str) -> (String, Vec<String>) {
    let (status, body) = post(
        client,
        base_url,
        "/orders",
        json!({
            "items": [
                { "sku": "SKU-A", "bin_location": "A-01", "required_quantity": 2 },
                { "sku": "SKU-B", "bin_location": "B-02", "required_quantity": 1 },
            ],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create order failed: {body}");

    let id = body["id"].as_str().unwrap().to_string();
    let items = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_str().unwrap().to_string())
        .collect();
    (id, items)
}

async fn claim(
    client: &reqwest::Client,
    base_url: &str,
    order_id: &str,
    worker: &WorkerId,
    role: &str,
) -> (StatusCode, JsonValue) {
    post(
        client,
        base_url,
        &format!("/orders/{order_id}/claim"),
        json!({ "worker_id": worker, "role": role }),
    )
    .await
}

async fn verify(
    client: &reqwest::Client,
    base_url: &str,
    order_id: &str,
    line_item_id: &str,
    worker: &WorkerId,
    quantity: u32,
) -> (StatusCode, JsonValue) {
    post(
        client,
        base_url,
        &format!("/orders/{order_id}/verify"),
        json!({ "line_item_id": line_item_id, "worker_id": worker, "quantity": quantity }),
    )
    .await
}

#[tokio::test]
async fn health_is_open() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn order_flows_from_intake_to_shipped() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (order_id, items) = create_order(&client, &srv.base_url).await;
    let picker = WorkerId::new();
    let packer = WorkerId::new();

    let (status, _) = claim(&client, &srv.base_url, &order_id, &picker, "picker").await;
    assert_eq!(status, StatusCode::OK);

    // Pick both lines to their required quantity.
    let (status, _) = verify(&client, &srv.base_url, &order_id, &items[0], &picker, 2).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = verify(&client, &srv.base_url, &order_id, &items[1], &picker, 1).await;
    assert_eq!(status, StatusCode::OK);

    let (_, order) = get(&client, &srv.base_url, &format!("/orders/{order_id}")).await;
    assert_eq!(order["status"], "picking");
    assert_eq!(order["pick_complete"], true);

    let (status, _) = post(
        &client,
        &srv.base_url,
        &format!("/orders/{order_id}/confirm-picked"),
        json!({ "worker_id": picker }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = claim(&client, &srv.base_url, &order_id, &packer, "packer").await;
    assert_eq!(status, StatusCode::OK);

    // Pack-side verification runs the same scan endpoint in the new phase.
    let (status, _) = verify(&client, &srv.base_url, &order_id, &items[0], &packer, 2).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = verify(&client, &srv.base_url, &order_id, &items[1], &packer, 1).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(
        &client,
        &srv.base_url,
        &format!("/orders/{order_id}/confirm-packed"),
        json!({ "worker_id": packer }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(
        &client,
        &srv.base_url,
        &format!("/orders/{order_id}/ship"),
        json!({ "worker_id": packer, "carrier": "UPS", "weight_grams": 1250 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, order) = get(&client, &srv.base_url, &format!("/orders/{order_id}")).await;
    assert_eq!(order["status"], "shipped");
    assert_eq!(order["shipment"]["carrier"], "UPS");
    // The picker released at confirm-picked; the packer stays on for audit.
    assert!(order["picker_id"].is_null());
    assert_eq!(order["packer_id"], json!(packer));
}

#[tokio::test]
async fn claim_is_exclusive_and_idempotent() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (order_id, _) = create_order(&client, &srv.base_url).await;
    let winner = WorkerId::new();
    let loser = WorkerId::new();

    // A successful claim answers with the updated order.
    let (status, body) = claim(&client, &srv.base_url, &order_id, &winner, "picker").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "picking");
    assert_eq!(body["picker_id"], json!(winner));

    let (status, body) = claim(&client, &srv.base_url, &order_id, &loser, "picker").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_claimed");

    // Re-claim by the holder is a no-op, not an error.
    let (status, body) = claim(&client, &srv.base_url, &order_id, &winner, "picker").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["picker_id"], json!(winner));
}

#[tokio::test]
async fn picker_cap_rejects_a_sixth_active_order() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let picker = WorkerId::new();

    for _ in 0..5 {
        let (order_id, _) = create_order(&client, &srv.base_url).await;
        let (status, _) = claim(&client, &srv.base_url, &order_id, &picker, "picker").await;
        assert_eq!(status, StatusCode::OK);
    }

    let (order_id, _) = create_order(&client, &srv.base_url).await;
    let (status, body) = claim(&client, &srv.base_url, &order_id, &picker, "picker").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "too_many_active_orders");

    // The rejected claim must not have touched the order.
    let (_, order) = get(&client, &srv.base_url, &format!("/orders/{order_id}")).await;
    assert_eq!(order["status"], "pending");
    assert!(order["picker_id"].is_null());

    let (status, body) = get(&client, &srv.base_url, "/orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["orders"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn verify_clamps_and_undo_guards_hold() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (order_id, items) = create_order(&client, &srv.base_url).await;
    let picker = WorkerId::new();
    claim(&client, &srv.base_url, &order_id, &picker, "picker").await;

    // Overshoot is clamped to required (2), not rejected. The response is
    // the line item just scanned.
    let (status, item) = verify(&client, &srv.base_url, &order_id, &items[0], &picker, 10).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["id"], items[0].as_str());
    assert_eq!(item["picked_quantity"], 2);
    assert_eq!(item["status"], "fully_done");

    // Another scan on a complete line is a conflict.
    let (status, body) = verify(&client, &srv.base_url, &order_id, &items[0], &picker, 1).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_complete");

    // Undo without a reason is a caller mistake.
    let (status, body) = post(
        &client,
        &srv.base_url,
        &format!("/orders/{order_id}/undo-verification"),
        json!({ "line_item_id": items[0], "worker_id": picker, "quantity": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "reason_required");

    // Stale expected quantity is a retryable state_changed conflict.
    let (status, body) = post(
        &client,
        &srv.base_url,
        &format!("/orders/{order_id}/undo-verification"),
        json!({
            "line_item_id": items[0],
            "worker_id": picker,
            "quantity": 1,
            "reason": "wrong bin",
            "expected": 1,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "state_changed");

    // Undoing more than was scanned has nothing to remove.
    let (status, body) = post(
        &client,
        &srv.base_url,
        &format!("/orders/{order_id}/undo-verification"),
        json!({
            "line_item_id": items[1],
            "worker_id": picker,
            "quantity": 1,
            "reason": "wrong bin",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "nothing_to_undo");

    // A correct undo restores the line to partial.
    let (status, item) = post(
        &client,
        &srv.base_url,
        &format!("/orders/{order_id}/undo-verification"),
        json!({
            "line_item_id": items[0],
            "worker_id": picker,
            "quantity": 1,
            "reason": "wrong bin",
            "expected": 2,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["picked_quantity"], 1);
    assert_eq!(item["status"], "partial");
}

#[tokio::test]
async fn picking_scans_move_stock_and_packing_scans_do_not() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let picker = WorkerId::new();
    let packer = WorkerId::new();

    // Seed both pick bins.
    for (sku, bin, qty) in [("SKU-A", "A-01", 10), ("SKU-B", "B-02", 5)] {
        let (status, _) = post(
            &client,
            &srv.base_url,
            "/stock/movements",
            json!({
                "sku": sku,
                "bin_location": bin,
                "delta_on_hand": qty,
                "kind": "receipt",
                "reason": "inbound",
                "worker_id": picker,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (order_id, items) = create_order(&client, &srv.base_url).await;
    claim(&client, &srv.base_url, &order_id, &picker, "picker").await;

    // Each picking scan draws the bin down immediately.
    let (status, _) = verify(&client, &srv.base_url, &order_id, &items[0], &picker, 2).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = get(&client, &srv.base_url, "/stock/levels?bin=A-01").await;
    assert_eq!(body["levels"][0]["quantity_on_hand"], 8);

    // Undo puts the unit back on the shelf.
    let (status, _) = post(
        &client,
        &srv.base_url,
        &format!("/orders/{order_id}/undo-verification"),
        json!({
            "line_item_id": items[0],
            "worker_id": picker,
            "quantity": 1,
            "reason": "wrong item",
            "expected": 2,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = get(&client, &srv.base_url, "/stock/levels?bin=A-01").await;
    assert_eq!(body["levels"][0]["quantity_on_hand"], 9);

    // Finish the pick.
    verify(&client, &srv.base_url, &order_id, &items[0], &picker, 1).await;
    verify(&client, &srv.base_url, &order_id, &items[1], &picker, 1).await;
    let (_, body) = get(&client, &srv.base_url, "/stock/levels?bin=B-02").await;
    assert_eq!(body["levels"][0]["quantity_on_hand"], 4);

    post(
        &client,
        &srv.base_url,
        &format!("/orders/{order_id}/confirm-picked"),
        json!({ "worker_id": picker }),
    )
    .await;
    claim(&client, &srv.base_url, &order_id, &packer, "packer").await;

    // Packing re-checks goods already off the shelf; the bins stay put.
    verify(&client, &srv.base_url, &order_id, &items[0], &packer, 2).await;
    verify(&client, &srv.base_url, &order_id, &items[1], &packer, 1).await;
    let (_, body) = get(&client, &srv.base_url, "/stock/levels?bin=A-01").await;
    assert_eq!(body["levels"][0]["quantity_on_hand"], 8);
    let (_, body) = get(&client, &srv.base_url, "/stock/levels?bin=B-02").await;
    assert_eq!(body["levels"][0]["quantity_on_hand"], 4);
}

#[tokio::test]
async fn skipped_lines_are_frozen_until_unskipped() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (order_id, items) = create_order(&client, &srv.base_url).await;
    let picker = WorkerId::new();
    claim(&client, &srv.base_url, &order_id, &picker, "picker").await;

    let (status, _) = post(
        &client,
        &srv.base_url,
        &format!("/orders/{order_id}/skip"),
        json!({ "line_item_id": items[1], "worker_id": picker, "reason": "bin empty" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = verify(&client, &srv.base_url, &order_id, &items[1], &picker, 1).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (status, _) = post(
        &client,
        &srv.base_url,
        &format!("/orders/{order_id}/unskip"),
        json!({ "line_item_id": items[1], "worker_id": picker }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = verify(&client, &srv.base_url, &order_id, &items[1], &picker, 1).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn ledger_rejects_overdraw_and_serves_levels() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let worker = WorkerId::new();

    let (status, body) = post(
        &client,
        &srv.base_url,
        "/stock/movements",
        json!({
            "sku": "SKU-A",
            "bin_location": "A-01",
            "delta_on_hand": 50,
            "kind": "receipt",
            "reason": "inbound",
            "worker_id": worker,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["stock_level"]["quantity_on_hand"], 50);

    let (status, body) = post(
        &client,
        &srv.base_url,
        "/stock/movements",
        json!({
            "sku": "SKU-A",
            "bin_location": "A-01",
            "delta_on_hand": -60,
            "kind": "pick",
            "reason": "order pick",
            "worker_id": worker,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "insufficient_stock");

    let (status, body) = get(&client, &srv.base_url, "/stock/levels?bin=A-01").await;
    assert_eq!(status, StatusCode::OK);
    let levels = body["levels"].as_array().unwrap();
    assert_eq!(levels.len(), 1);
    assert_eq!(levels[0]["quantity_on_hand"], 50);
    assert_eq!(levels[0]["available"], 50);
}

#[tokio::test]
async fn capacity_walk_raises_and_acknowledges_one_alert() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let worker = WorkerId::new();

    let (status, _) = post(
        &client,
        &srv.base_url,
        "/capacity/bins",
        json!({ "location": "A-01", "zone": "A", "location_type": "shelf" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, rule) = post(
        &client,
        &srv.base_url,
        "/capacity/rules",
        json!({
            "scope": "specific_location",
            "scope_value": "A-01",
            "capacity_type": "quantity",
            "maximum_capacity": 100.0,
            "warning_threshold_pct": 80.0,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{rule}");

    let receive = |qty: i64| {
        let client = client.clone();
        let base_url = srv.base_url.clone();
        let worker = worker;
        async move {
            post(
                &client,
                &base_url,
                "/stock/movements",
                json!({
                    "sku": "SKU-A",
                    "bin_location": "A-01",
                    "delta_on_hand": qty,
                    "kind": "receipt",
                    "reason": "inbound",
                    "worker_id": worker,
                }),
            )
            .await
        }
    };

    // 79 on hand: normal, no alert yet.
    let (status, body) = receive(79).await;
    assert_eq!(status, StatusCode::CREATED);
    let quantity = body["capacity"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["capacity_type"] == "quantity")
        .unwrap()
        .clone();
    assert_eq!(quantity["status"], "normal");

    let (_, body) = get(&client, &srv.base_url, "/capacity/alerts").await;
    assert_eq!(body["alerts"].as_array().unwrap().len(), 0);

    // 81 on hand: warning, one open alert.
    receive(2).await;
    let (_, body) = get(&client, &srv.base_url, "/capacity/alerts").await;
    let alerts = body["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["status"], "warning");
    let alert_id = alerts[0]["id"].as_str().unwrap().to_string();

    // 106 on hand: exceeded, still the same alert record.
    receive(25).await;
    let (_, body) = get(
        &client,
        &srv.base_url,
        "/capacity/locations?type=quantity&alerts_only=true",
    )
    .await;
    let locations = body["locations"].as_array().unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0]["status"], "exceeded");

    let (_, body) = get(&client, &srv.base_url, "/capacity/alerts").await;
    let alerts = body["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["id"], alert_id.as_str());
    assert_eq!(alerts[0]["status"], "exceeded");

    let (status, acked) = post(
        &client,
        &srv.base_url,
        &format!("/capacity/alerts/{alert_id}/acknowledge"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(acked["acknowledged"], true);

    let (_, body) = get(&client, &srv.base_url, "/capacity/alerts").await;
    assert_eq!(body["alerts"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn cycle_count_gate_blocks_until_variances_resolve() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let counter = WorkerId::new();

    // Seed the ledger so the adjustment lands on a real level.
    let (status, _) = post(
        &client,
        &srv.base_url,
        "/stock/movements",
        json!({
            "sku": "SKU-A",
            "bin_location": "A-01",
            "delta_on_hand": 50,
            "kind": "receipt",
            "reason": "inbound",
            "worker_id": counter,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, plan) = post(
        &client,
        &srv.base_url,
        "/cycle-counts",
        json!({ "bin_location": "A-01" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{plan}");
    let plan_id = plan["id"].as_str().unwrap().to_string();

    let (status, _) = post(
        &client,
        &srv.base_url,
        &format!("/cycle-counts/{plan_id}/start"),
        json!({ "worker_id": counter }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // System says 50, the shelf says 47.
    let (status, _) = post(
        &client,
        &srv.base_url,
        &format!("/cycle-counts/{plan_id}/entries"),
        json!({
            "sku": "SKU-A",
            "bin_location": "A-01",
            "system_quantity": 50,
            "counted_quantity": 47,
            "worker_id": counter,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(
        &client,
        &srv.base_url,
        &format!("/cycle-counts/{plan_id}/complete"),
        json!({ "worker_id": counter, "auto_adjust_tolerance": 0 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Reconciliation is gated on the pending variance.
    let (status, body) = post(
        &client,
        &srv.base_url,
        &format!("/cycle-counts/{plan_id}/reconcile"),
        json!({ "worker_id": counter }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unresolved_variances");

    let (_, plan) = get(&client, &srv.base_url, &format!("/cycle-counts/{plan_id}")).await;
    let entry_id = plan["entries"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(plan["entries"][0]["variance"], -3);

    let res = client
        .put(format!(
            "{}/cycle-counts/{plan_id}/entries/{entry_id}/variance",
            srv.base_url
        ))
        .json(&json!({ "status": "approve", "worker_id": counter }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Approval itself writes the counted delta to the ledger, before any
    // reconcile.
    let (_, body) = get(&client, &srv.base_url, "/stock/levels?bin=A-01").await;
    assert_eq!(body["levels"][0]["quantity_on_hand"], 47);

    let (status, _) = post(
        &client,
        &srv.base_url,
        &format!("/cycle-counts/{plan_id}/reconcile"),
        json!({ "worker_id": counter }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, plan) = get(&client, &srv.base_url, &format!("/cycle-counts/{plan_id}")).await;
    assert_eq!(plan["status"], "reconciled");

    let (status, body) = get(&client, &srv.base_url, "/cycle-counts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plans"].as_array().unwrap().len(), 1);

    // Reconcile is only the bookkeeping transition; the level is unchanged.
    let (_, body) = get(&client, &srv.base_url, "/stock/levels?bin=A-01").await;
    assert_eq!(body["levels"][0]["quantity_on_hand"], 47);
}
