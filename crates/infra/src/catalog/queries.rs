//! GraphQL documents sent to the Admin API.

pub(crate) const VARIANTS_BY_SKU: &str = r#"
query VariantsBySku($query: String!, $first: Int!) {
  productVariants(first: $first, query: $query) {
    nodes {
      id
      sku
      inventoryItem { id }
    }
  }
}
"#;

pub(crate) const INVENTORY_ITEM: &str = r#"
query InventoryItem($id: ID!) {
  inventoryItem(id: $id) {
    id
    sku
  }
}
"#;

pub(crate) const SET_QUANTITIES: &str = r#"
mutation SetQuantities($input: InventorySetQuantitiesInput!) {
  inventorySetQuantities(input: $input) {
    inventoryAdjustmentGroup {
      changes { name delta quantityAfterChange item { id } location { id } }
    }
    userErrors { field message }
  }
}
"#;

pub(crate) const ADJUST_QUANTITIES: &str = r#"
mutation AdjustQuantities($input: InventoryAdjustQuantitiesInput!) {
  inventoryAdjustQuantities(input: $input) {
    inventoryAdjustmentGroup {
      changes { name delta quantityAfterChange item { id } location { id } }
    }
    userErrors { field message }
  }
}
"#;

/// Search string matching one SKU exactly (as far as the search engine allows).
pub(crate) fn sku_search(sku: &str) -> String {
    let escaped = sku.replace('\\', "\\\\").replace('"', "\\\"");
    format!("sku:\"{escaped}\"")
}
