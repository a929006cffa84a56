//! GraphQL Admin API adapter.
//!
//! Every operation goes through one primitive, [`GraphqlCatalogClient::execute`].
//! Retry and batching are layered around it:
//!
//! - reads (`query`) retry on any transient error
//! - writes (`mutate`) retry only when the API throttled us, since a
//!   transport error after the request left leaves its effect unknown
//! - write batches are cut with [`write_in_batches`], one mutation per batch

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use stocklink_core::{InventoryItemId, LocationId, Sku, VariantId};
use stocklink_inventory::catalog::{
    DEFAULT_BATCH_SIZE, MAX_VARIANTS_PER_SKU, retain_exact_sku, write_in_batches,
};
use stocklink_inventory::{
    AdjustReason, CatalogClient, CatalogError, InventoryItemRecord, LevelChange, QuantityDelta,
    QuantitySet, UserError, Variant, WriteReport,
};

use super::queries;
use crate::retry::RetryPolicy;

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";
const QUANTITY_NAME: &str = "available";

/// Connection settings for [`GraphqlCatalogClient`].
#[derive(Clone)]
pub struct GraphqlCatalogConfig {
    /// Full GraphQL endpoint URL.
    pub endpoint: String,
    pub access_token: String,
    /// Updates per mutation request.
    pub batch_size: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl GraphqlCatalogConfig {
    /// Settings for `https://{shop}/admin/api/{api_version}/graphql.json`.
    pub fn for_shop(shop: &str, api_version: &str, access_token: impl Into<String>) -> Self {
        let shop = shop.trim().trim_end_matches('/');
        Self {
            endpoint: format!("https://{shop}/admin/api/{api_version}/graphql.json"),
            access_token: access_token.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl std::fmt::Debug for GraphqlCatalogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlCatalogConfig")
            .field("endpoint", &self.endpoint)
            .field("access_token", &"<redacted>")
            .field("batch_size", &self.batch_size)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
    #[serde(default)]
    extensions: Option<ErrorExtensions>,
}

#[derive(Debug, Deserialize)]
struct ErrorExtensions {
    #[serde(default)]
    code: Option<String>,
}

impl GraphqlError {
    fn is_throttled(&self) -> bool {
        self.extensions
            .as_ref()
            .and_then(|e| e.code.as_deref())
            .is_some_and(|code| code == "THROTTLED")
    }
}

#[derive(Debug, Deserialize)]
struct IdNode<T> {
    id: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariantsData {
    product_variants: VariantConnection,
}

#[derive(Debug, Deserialize)]
struct VariantConnection {
    #[serde(default)]
    nodes: Vec<VariantNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariantNode {
    id: VariantId,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    inventory_item: Option<IdNode<InventoryItemId>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InventoryItemData {
    inventory_item: Option<InventoryItemNode>,
}

#[derive(Debug, Deserialize)]
struct InventoryItemNode {
    id: InventoryItemId,
    #[serde(default)]
    sku: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetQuantitiesData {
    inventory_set_quantities: Option<MutationPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdjustQuantitiesData {
    inventory_adjust_quantities: Option<MutationPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutationPayload {
    #[serde(default)]
    inventory_adjustment_group: Option<AdjustmentGroup>,
    #[serde(default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct AdjustmentGroup {
    #[serde(default)]
    changes: Vec<AdjustmentChange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdjustmentChange {
    name: String,
    #[serde(default)]
    quantity_after_change: Option<i64>,
    item: IdNode<InventoryItemId>,
    location: IdNode<LocationId>,
}

impl MutationPayload {
    /// A batch with any user error counts as failed.
    fn into_level_changes(self) -> Result<Vec<LevelChange>, CatalogError> {
        if !self.user_errors.is_empty() {
            return Err(CatalogError::UserErrors(self.user_errors));
        }

        let changes = self
            .inventory_adjustment_group
            .map(|group| group.changes)
            .unwrap_or_default();

        Ok(changes
            .into_iter()
            .filter(|c| c.name == QUANTITY_NAME)
            .filter_map(|c| {
                Some(LevelChange {
                    inventory_item_id: c.item.id,
                    location_id: c.location.id,
                    quantity_after: c.quantity_after_change?,
                })
            })
            .collect())
    }
}

/// `CatalogClient` backed by the GraphQL Admin API.
#[derive(Debug, Clone)]
pub struct GraphqlCatalogClient {
    http: reqwest::Client,
    config: GraphqlCatalogConfig,
}

impl GraphqlCatalogClient {
    pub fn new(config: GraphqlCatalogConfig) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CatalogError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &GraphqlCatalogConfig {
        &self.config
    }

    /// Post one GraphQL document and decode its `data`.
    ///
    /// HTTP 429 and `THROTTLED` errors map to [`CatalogError::Throttled`];
    /// any other top-level error list maps to [`CatalogError::Remote`].
    pub async fn execute<T: DeserializeOwned>(
        &self,
        document: &str,
        variables: Value,
    ) -> Result<T, CatalogError> {
        let resp = self
            .http
            .post(&self.config.endpoint)
            .header(ACCESS_TOKEN_HEADER, &self.config.access_token)
            .json(&json!({ "query": document, "variables": variables }))
            .send()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64);
            return Err(CatalogError::Throttled { retry_after });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CatalogError::Transport(format!(
                "http {status}: {}",
                truncate(&body, 200)
            )));
        }

        let envelope: GraphqlResponse<T> = resp
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;

        if !envelope.errors.is_empty() {
            if envelope.errors.iter().any(GraphqlError::is_throttled) {
                return Err(CatalogError::Throttled { retry_after: None });
            }
            let message = envelope
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            warn!(error = %message, "catalog api returned errors");
            return Err(CatalogError::Remote(message));
        }

        envelope
            .data
            .ok_or_else(|| CatalogError::Decode("response carried no data".into()))
    }

    #[instrument(skip(self, document, variables), err)]
    async fn query<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        document: &'static str,
        variables: Value,
    ) -> Result<T, CatalogError> {
        let this = self;
        self.with_retry(operation, CatalogError::is_transient, move || {
            this.execute(document, variables.clone())
        })
        .await
    }

    #[instrument(skip(self, document, variables), err)]
    async fn mutate<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        document: &'static str,
        variables: Value,
    ) -> Result<T, CatalogError> {
        let this = self;
        self.with_retry(operation, CatalogError::is_throttled, move || {
            this.execute(document, variables.clone())
        })
        .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        retryable: fn(&CatalogError) -> bool,
        mut call: F,
    ) -> Result<T, CatalogError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CatalogError>>,
    {
        let policy = &self.config.retry;
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) && policy.should_retry(attempt) => {
                    attempt += 1;
                    let delay = match &e {
                        CatalogError::Throttled {
                            retry_after: Some(after),
                        } => (*after).min(policy.max_delay),
                        _ => policy.delay_for_attempt(attempt),
                    };
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "catalog call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn set_batch(
        &self,
        batch: &[QuantitySet],
        reason: AdjustReason,
    ) -> Result<Vec<LevelChange>, CatalogError> {
        let quantities: Vec<Value> = batch
            .iter()
            .map(|u| {
                json!({
                    "inventoryItemId": u.inventory_item_id.to_gid(),
                    "locationId": u.location_id.to_gid(),
                    "quantity": u.quantity,
                })
            })
            .collect();
        let variables = json!({
            "input": {
                "reason": reason.as_str(),
                "name": QUANTITY_NAME,
                "ignoreCompareQuantity": true,
                "quantities": quantities,
            }
        });

        let data: SetQuantitiesData = self
            .mutate("inventorySetQuantities", queries::SET_QUANTITIES, variables)
            .await?;
        data.inventory_set_quantities
            .ok_or_else(|| CatalogError::Decode("missing inventorySetQuantities payload".into()))?
            .into_level_changes()
    }

    async fn adjust_batch(
        &self,
        batch: &[QuantityDelta],
        reason: AdjustReason,
    ) -> Result<Vec<LevelChange>, CatalogError> {
        let changes: Vec<Value> = batch
            .iter()
            .map(|u| {
                json!({
                    "inventoryItemId": u.inventory_item_id.to_gid(),
                    "locationId": u.location_id.to_gid(),
                    "delta": u.delta,
                })
            })
            .collect();
        let variables = json!({
            "input": {
                "reason": reason.as_str(),
                "name": QUANTITY_NAME,
                "changes": changes,
            }
        });

        let data: AdjustQuantitiesData = self
            .mutate("inventoryAdjustQuantities", queries::ADJUST_QUANTITIES, variables)
            .await?;
        data.inventory_adjust_quantities
            .ok_or_else(|| CatalogError::Decode("missing inventoryAdjustQuantities payload".into()))?
            .into_level_changes()
    }
}

#[async_trait]
impl CatalogClient for GraphqlCatalogClient {
    async fn find_variants_by_sku(&self, sku: &Sku) -> Result<Vec<Variant>, CatalogError> {
        let data: VariantsData = self
            .query(
                "productVariants",
                queries::VARIANTS_BY_SKU,
                json!({
                    "query": queries::sku_search(sku.as_str()),
                    "first": MAX_VARIANTS_PER_SKU,
                }),
            )
            .await?;

        let variants = data
            .product_variants
            .nodes
            .into_iter()
            .filter_map(|node| {
                Some(Variant {
                    id: node.id,
                    sku: Sku::from_optional(node.sku.as_deref())?,
                    inventory_item_id: node.inventory_item?.id,
                })
            })
            .collect();

        Ok(retain_exact_sku(sku, variants))
    }

    async fn get_inventory_item(
        &self,
        id: InventoryItemId,
    ) -> Result<Option<InventoryItemRecord>, CatalogError> {
        let data: InventoryItemData = self
            .query(
                "inventoryItem",
                queries::INVENTORY_ITEM,
                json!({ "id": id.to_gid() }),
            )
            .await?;

        Ok(data.inventory_item.map(|item| InventoryItemRecord {
            id: item.id,
            sku: Sku::from_optional(item.sku.as_deref()),
        }))
    }

    async fn set_absolute_quantities(
        &self,
        updates: &[QuantitySet],
        reason: AdjustReason,
    ) -> Result<WriteReport, CatalogError> {
        let this = self;
        Ok(
            write_in_batches(updates, self.config.batch_size, reason, move |batch| {
                this.set_batch(batch, reason)
            })
            .await,
        )
    }

    async fn apply_quantity_deltas(
        &self,
        updates: &[QuantityDelta],
        reason: AdjustReason,
    ) -> Result<WriteReport, CatalogError> {
        let this = self;
        Ok(
            write_in_batches(updates, self.config.batch_size, reason, move |batch| {
                this.adjust_batch(batch, reason)
            })
            .await,
        )
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays scripted responses and records every request it receives.
    #[derive(Default)]
    struct FakeAdminApi {
        responses: Mutex<VecDeque<(u16, Value)>>,
        requests: Mutex<Vec<Value>>,
        tokens: Mutex<Vec<String>>,
    }

    impl FakeAdminApi {
        fn scripted(responses: Vec<(u16, Value)>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            })
        }

        fn requests(&self) -> Vec<Value> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn graphql(
        State(api): State<Arc<FakeAdminApi>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (AxumStatus, Json<Value>) {
        api.requests.lock().unwrap().push(body);
        if let Some(token) = headers.get(ACCESS_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
            api.tokens.lock().unwrap().push(token.to_string());
        }
        let (status, body) = api
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((500, json!({ "errors": [{ "message": "no scripted response" }] })));
        (AxumStatus::from_u16(status).unwrap(), Json(body))
    }

    async fn client_for(api: Arc<FakeAdminApi>, batch_size: usize) -> GraphqlCatalogClient {
        let app = Router::new()
            .route("/admin/api/2024-10/graphql.json", post(graphql))
            .with_state(api);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut config = GraphqlCatalogConfig::for_shop("unused.example", "2024-10", "shpat_test")
            .with_batch_size(batch_size)
            .with_retry(RetryPolicy::fixed(2, Duration::from_millis(5)));
        config.endpoint = format!("http://{addr}/admin/api/2024-10/graphql.json");
        GraphqlCatalogClient::new(config).unwrap()
    }

    fn variant_node(id: u64, sku: Option<&str>, item: u64) -> Value {
        json!({
            "id": format!("gid://shopify/ProductVariant/{id}"),
            "sku": sku,
            "inventoryItem": { "id": format!("gid://shopify/InventoryItem/{item}") },
        })
    }

    fn mutation_ok(field: &str, changes: Vec<(u64, u64, i64)>) -> Value {
        let changes: Vec<Value> = changes
            .into_iter()
            .map(|(item, loc, after)| {
                json!({
                    "name": "available",
                    "delta": 0,
                    "quantityAfterChange": after,
                    "item": { "id": format!("gid://shopify/InventoryItem/{item}") },
                    "location": { "id": format!("gid://shopify/Location/{loc}") },
                })
            })
            .collect();
        json!({ "data": { field: {
            "inventoryAdjustmentGroup": { "changes": changes },
            "userErrors": [],
        }}})
    }

    #[test]
    fn endpoint_is_built_from_shop_and_version() {
        let config = GraphqlCatalogConfig::for_shop("demo.myshopify.com/", "2024-10", "secret-token");
        assert_eq!(
            config.endpoint,
            "https://demo.myshopify.com/admin/api/2024-10/graphql.json"
        );
        assert!(!format!("{config:?}").contains("secret-token"));
    }

    #[tokio::test]
    async fn variant_search_keeps_exact_sku_matches_only() {
        let api = FakeAdminApi::scripted(vec![(
            200,
            json!({ "data": { "productVariants": { "nodes": [
                variant_node(1, Some("RED-L"), 111),
                variant_node(2, Some("RED-LX"), 999),
                variant_node(3, None, 888),
                variant_node(4, Some("RED-L"), 222),
            ]}}}),
        )]);
        let client = client_for(api.clone(), 50).await;

        let variants = client
            .find_variants_by_sku(&Sku::parse(" RED-L ").unwrap())
            .await
            .unwrap();

        assert_eq!(
            variants.iter().map(|v| v.inventory_item_id.get()).collect::<Vec<_>>(),
            vec![111, 222]
        );
        let sent = &api.requests()[0];
        assert_eq!(sent["variables"]["query"], json!("sku:\"RED-L\""));
        assert_eq!(sent["variables"]["first"], json!(100));
        assert_eq!(api.tokens.lock().unwrap().as_slice(), ["shpat_test"]);
    }

    #[tokio::test]
    async fn missing_inventory_item_is_none() {
        let api = FakeAdminApi::scripted(vec![
            (200, json!({ "data": { "inventoryItem": null } })),
            (
                200,
                json!({ "data": { "inventoryItem": { "id": "gid://shopify/InventoryItem/5", "sku": "  " } } }),
            ),
        ]);
        let client = client_for(api.clone(), 50).await;

        assert_eq!(client.get_inventory_item(InventoryItemId::new(4)).await.unwrap(), None);
        let blank = client.get_inventory_item(InventoryItemId::new(5)).await.unwrap().unwrap();
        assert_eq!(blank.sku, None);
        assert_eq!(
            api.requests()[0]["variables"]["id"],
            json!("gid://shopify/InventoryItem/4")
        );
    }

    #[tokio::test]
    async fn throttled_reads_are_retried() {
        let api = FakeAdminApi::scripted(vec![
            (
                200,
                json!({ "errors": [{ "message": "Throttled", "extensions": { "code": "THROTTLED" } }] }),
            ),
            (429, json!({})),
            (200, json!({ "data": { "inventoryItem": null } })),
        ]);
        let client = client_for(api.clone(), 50).await;

        assert_eq!(client.get_inventory_item(InventoryItemId::new(1)).await.unwrap(), None);
        assert_eq!(api.requests().len(), 3);
    }

    #[tokio::test]
    async fn remote_errors_are_not_retried() {
        let api = FakeAdminApi::scripted(vec![(
            200,
            json!({ "errors": [{ "message": "Field 'bogus' doesn't exist" }] }),
        )]);
        let client = client_for(api.clone(), 50).await;

        let err = client.get_inventory_item(InventoryItemId::new(1)).await.unwrap_err();
        assert!(matches!(err, CatalogError::Remote(ref m) if m.contains("bogus")));
        assert_eq!(api.requests().len(), 1);
    }

    #[tokio::test]
    async fn set_quantities_sends_gids_and_reports_levels() {
        let api = FakeAdminApi::scripted(vec![(
            200,
            mutation_ok("inventorySetQuantities", vec![(222, 99, 5), (333, 99, 5)]),
        )]);
        let client = client_for(api.clone(), 50).await;

        let updates = [
            QuantitySet {
                inventory_item_id: InventoryItemId::new(222),
                location_id: LocationId::new(99),
                quantity: 5,
            },
            QuantitySet {
                inventory_item_id: InventoryItemId::new(333),
                location_id: LocationId::new(99),
                quantity: 5,
            },
        ];
        let report = client
            .set_absolute_quantities(&updates, AdjustReason::Correction)
            .await
            .unwrap();

        assert_eq!(report.batches, 1);
        assert!(report.is_complete());
        assert_eq!(report.applied.len(), 2);

        let input = &api.requests()[0]["variables"]["input"];
        assert_eq!(input["reason"], json!("correction"));
        assert_eq!(input["name"], json!("available"));
        assert_eq!(input["ignoreCompareQuantity"], json!(true));
        assert_eq!(
            input["quantities"][0],
            json!({
                "inventoryItemId": "gid://shopify/InventoryItem/222",
                "locationId": "gid://shopify/Location/99",
                "quantity": 5,
            })
        );
    }

    #[tokio::test]
    async fn failed_batch_does_not_stop_the_rest() {
        let api = FakeAdminApi::scripted(vec![
            (
                200,
                json!({ "data": { "inventoryAdjustQuantities": {
                    "inventoryAdjustmentGroup": null,
                    "userErrors": [{ "field": ["input", "changes", "0"], "message": "item not stocked" }],
                }}}),
            ),
            (200, mutation_ok("inventoryAdjustQuantities", vec![(2, 7, 4)])),
        ]);
        let client = client_for(api.clone(), 1).await;

        let deltas = [1, 2].map(|item| QuantityDelta {
            inventory_item_id: InventoryItemId::new(item),
            location_id: LocationId::new(7),
            delta: -1,
        });
        let report = client
            .apply_quantity_deltas(&deltas, AdjustReason::Sale)
            .await
            .unwrap();

        assert_eq!(report.batches, 2);
        assert_eq!(report.failed_batches, 1);
        assert!(report.errors[0].contains("item not stocked"));
        assert_eq!(
            report.applied,
            vec![LevelChange {
                inventory_item_id: InventoryItemId::new(2),
                location_id: LocationId::new(7),
                quantity_after: 4,
            }]
        );
        assert_eq!(api.requests().len(), 2);
    }

    #[tokio::test]
    async fn writes_retry_on_throttle_but_not_on_server_errors() {
        let api = FakeAdminApi::scripted(vec![
            (429, json!({})),
            (200, mutation_ok("inventoryAdjustQuantities", vec![(1, 7, 9)])),
            (502, json!({ "error": "bad gateway" })),
        ]);
        let client = client_for(api.clone(), 1).await;

        let deltas = [1, 2].map(|item| QuantityDelta {
            inventory_item_id: InventoryItemId::new(item),
            location_id: LocationId::new(7),
            delta: 1,
        });
        let report = client
            .apply_quantity_deltas(&deltas, AdjustReason::ReturnOrCancel)
            .await
            .unwrap();

        // First batch: 429 then success. Second batch: one 502, no retry.
        assert_eq!(api.requests().len(), 3);
        assert_eq!(report.failed_batches, 1);
        assert!(report.errors[0].contains("502"));
    }
}
