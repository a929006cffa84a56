use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use stocklink_api::app::{AppServices, build_app};
use stocklink_auth::HmacSha256Verifier;
use stocklink_core::{InventoryItemId, LocationId, Sku};
use stocklink_infra::{InMemoryCatalog, WriteCall};
use stocklink_inventory::{
    AdjustReason, CatalogClient, QuantityDelta, QuantitySet, SyncSettings, SyncTracker,
};

const SECRET: &str = "test-webhook-secret";
const LOCATION: u64 = 99;

struct TestServer {
    base_url: String,
    catalog: Arc<InMemoryCatalog>,
    tracker: SyncTracker,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let red_l = Sku::parse("RED-L").unwrap();
        let catalog = Arc::new(
            InMemoryCatalog::new()
                .with_variant(1, red_l.clone(), 111)
                .with_variant(2, red_l.clone(), 222)
                .with_variant(3, red_l, 333)
                .with_variant(4, Sku::parse("SOLO").unwrap(), 444),
        );
        for item in [111, 222, 333, 444] {
            catalog.set_level(InventoryItemId::new(item), LocationId::new(LOCATION), 10);
        }

        let tracker = SyncTracker::default();
        let services = AppServices::new(
            catalog.clone() as Arc<dyn CatalogClient>,
            tracker.clone(),
            SyncSettings::default(),
            Arc::new(HmacSha256Verifier::new(SECRET)),
        );

        // Build app (same router as prod), but bind to an ephemeral port.
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            catalog,
            tracker,
            handle,
        }
    }

    async fn post_signed(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        let raw = serde_json::to_vec(body).unwrap();
        let signature = HmacSha256Verifier::new(SECRET).sign(&raw);
        self.post_raw(path, raw, Some(&signature)).await
    }

    async fn post_raw(
        &self,
        path: &str,
        raw: Vec<u8>,
        signature: Option<&str>,
    ) -> reqwest::Response {
        let mut req = reqwest::Client::new()
            .post(format!("{}{}", self.base_url, path))
            .header("content-type", "application/json")
            .header("x-shopify-webhook-id", "test-delivery")
            .body(raw);
        if let Some(sig) = signature {
            req = req.header("x-shopify-hmac-sha256", sig);
        }
        req.send().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Writes happen after the acknowledgement; poll briefly until they land.
async fn writes_eventually(catalog: &InMemoryCatalog, expected: usize) -> Vec<WriteCall> {
    for _ in 0..50 {
        let writes = catalog.writes();
        if writes.len() >= expected {
            return writes;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {expected} write(s), saw {:?}", catalog.writes());
}

/// Give background flows that should do nothing a chance to misbehave.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

fn level_update(item: u64, available: i64) -> serde_json::Value {
    json!({
        "inventory_item_id": item,
        "location_id": LOCATION,
        "available": available,
        "updated_at": "2024-05-01T10:00:00Z",
    })
}

fn order(id: u64, items: &[(&str, i64)]) -> serde_json::Value {
    json!({
        "id": id,
        "location_id": LOCATION,
        "line_items": items
            .iter()
            .map(|(sku, quantity)| json!({ "sku": sku, "quantity": quantity }))
            .collect::<Vec<_>>(),
    })
}

#[tokio::test]
async fn status_reports_sync_state() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(format!("{}/", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "stocklink");
    assert_eq!(body["sync"], json!({ "records": 0, "locks": 0, "orders": 0 }));

    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn unsigned_or_tampered_webhooks_are_rejected() {
    let srv = TestServer::spawn().await;
    let raw = serde_json::to_vec(&level_update(111, 5)).unwrap();
    let signature = HmacSha256Verifier::new(SECRET).sign(&raw);

    let res = srv
        .post_raw("/webhooks/inventory_levels/update", raw.clone(), None)
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let mut tampered = raw.clone();
    tampered.push(b' ');
    let res = srv
        .post_raw("/webhooks/inventory_levels/update", tampered, Some(&signature))
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_signature");

    let res = srv
        .post_raw("/webhooks/orders/create", raw, Some("not-base64!"))
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    settle().await;
    assert!(srv.catalog.writes().is_empty());
}

#[tokio::test]
async fn invalid_payloads_are_rejected_with_400() {
    let srv = TestServer::spawn().await;

    let res = srv
        .post_signed(
            "/webhooks/inventory_levels/update",
            &json!({ "inventory_item_id": 111, "location_id": LOCATION }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "missing_field");

    let res = srv
        .post_signed("/webhooks/orders/create", &json!({ "id": 1, "line_items": "nope" }))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let raw = b"{not json".to_vec();
    let signature = HmacSha256Verifier::new(SECRET).sign(&raw);
    let res = srv
        .post_raw("/webhooks/orders/cancelled", raw, Some(&signature))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn level_change_propagates_to_siblings_once() {
    let srv = TestServer::spawn().await;

    let res = srv
        .post_signed("/webhooks/inventory_levels/update", &level_update(111, 5))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.json::<serde_json::Value>().await.unwrap(), json!({ "accepted": true }));

    let writes = writes_eventually(&srv.catalog, 1).await;
    assert_eq!(
        writes,
        vec![WriteCall::Set {
            reason: AdjustReason::Correction,
            updates: [222, 333]
                .map(|item| QuantitySet {
                    inventory_item_id: InventoryItemId::new(item),
                    location_id: LocationId::new(LOCATION),
                    quantity: 5,
                })
                .to_vec(),
        }]
    );

    // Replay of the same delivery and the echoes of our own writes.
    for item in [111, 222, 333] {
        let res = srv
            .post_signed("/webhooks/inventory_levels/update", &level_update(item, 5))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
    }
    settle().await;

    assert_eq!(srv.catalog.writes().len(), 1);
    assert_eq!(srv.tracker.stats().locks, 0);
    assert_eq!(srv.tracker.stats().records, 1);
}

#[tokio::test]
async fn order_created_then_cancelled_moves_every_sibling() {
    let srv = TestServer::spawn().await;
    let loc = LocationId::new(LOCATION);

    let res = srv
        .post_signed("/webhooks/orders/create", &order(5001, &[("RED-L", 3), ("SOLO", 1)]))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let writes = writes_eventually(&srv.catalog, 1).await;
    assert_eq!(
        writes[0],
        WriteCall::Adjust {
            reason: AdjustReason::Sale,
            updates: [111, 222, 333]
                .map(|item| QuantityDelta {
                    inventory_item_id: InventoryItemId::new(item),
                    location_id: loc,
                    delta: -3,
                })
                .to_vec(),
        }
    );
    for item in [111, 222, 333] {
        assert_eq!(srv.catalog.level(InventoryItemId::new(item), loc), Some(7));
    }
    assert_eq!(srv.catalog.level(InventoryItemId::new(444), loc), Some(10));

    // The platform echoes each adjusted level; none of them may fan out again.
    let res = srv
        .post_signed("/webhooks/inventory_levels/update", &level_update(222, 7))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    // A redelivered order must not be applied twice.
    let res = srv
        .post_signed("/webhooks/orders/create", &order(5001, &[("RED-L", 3), ("SOLO", 1)]))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    settle().await;
    assert_eq!(srv.catalog.writes().len(), 1);

    let res = srv
        .post_signed("/webhooks/orders/cancelled", &order(5001, &[("RED-L", 3)]))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let writes = writes_eventually(&srv.catalog, 2).await;
    assert!(matches!(
        &writes[1],
        WriteCall::Adjust { reason: AdjustReason::ReturnOrCancel, updates }
            if updates.iter().all(|d| d.delta == 3) && updates.len() == 3
    ));
    for item in [111, 222, 333] {
        assert_eq!(srv.catalog.level(InventoryItemId::new(item), loc), Some(10));
    }
}
