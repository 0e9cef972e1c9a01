use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgepos_core::{DomainError, DomainResult, TableId};

/// Version written by [`encode`]; [`decode`] rejects anything else.
pub const CARTS_FORMAT_VERSION: u32 = 1;

/// Cart line: product, quantity, unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub line_no: u32,
    pub product_id: String,
    pub name: String,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
}

impl CartLine {
    pub fn subtotal(&self) -> u64 {
        self.unit_price.saturating_mul(self.quantity.max(0) as u64)
    }
}

/// Open cart for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCart {
    table_id: TableId,
    lines: Vec<CartLine>,
    opened_at: DateTime<Utc>,
}

impl TableCart {
    pub fn new(table_id: TableId, opened_at: DateTime<Utc>) -> Self {
        Self {
            table_id,
            lines: Vec::new(),
            opened_at,
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Add `quantity` of a product. Adding a product already on the cart bumps
    /// the existing line instead of appending a new one.
    pub fn add_item(
        &mut self,
        product_id: impl Into<String>,
        name: impl Into<String>,
        quantity: i64,
        unit_price: u64,
    ) -> DomainResult<()> {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        let product_id = product_id.into();
        if product_id.trim().is_empty() {
            return Err(DomainError::validation("product_id is required"));
        }

        if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity = line
                .quantity
                .checked_add(quantity)
                .ok_or_else(|| DomainError::validation("line quantity is too large"))?;
            return Ok(());
        }

        let line_no = self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;
        self.lines.push(CartLine {
            line_no,
            product_id,
            name: name.into(),
            quantity,
            unit_price,
        });
        Ok(())
    }

    /// Set the quantity of an existing line; zero removes it.
    pub fn set_quantity(&mut self, product_id: &str, quantity: i64) -> DomainResult<()> {
        if quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        let idx = self
            .lines
            .iter()
            .position(|l| l.product_id == product_id)
            .ok_or_else(DomainError::not_found)?;

        if quantity == 0 {
            self.lines.remove(idx);
        } else {
            self.lines[idx].quantity = quantity;
        }
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: &str) -> DomainResult<()> {
        self.set_quantity(product_id, 0)
    }

    /// Cart total in minor units.
    pub fn total(&self) -> u64 {
        self.lines
            .iter()
            .fold(0u64, |acc, line| acc.saturating_add(line.subtotal()))
    }
}

/// All open table carts, keyed by table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableCarts {
    tables: BTreeMap<TableId, TableCart>,
}

impl TableCarts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table_id: TableId) -> Option<&TableCart> {
        self.tables.get(&table_id)
    }

    /// Cart for `table_id`, opening an empty one if the table has none.
    pub fn open(&mut self, table_id: TableId, now: DateTime<Utc>) -> &mut TableCart {
        self.tables
            .entry(table_id)
            .or_insert_with(|| TableCart::new(table_id, now))
    }

    /// Close a table (e.g. after checkout), returning its cart.
    pub fn close(&mut self, table_id: TableId) -> Option<TableCart> {
        self.tables.remove(&table_id)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TableId, &TableCart)> {
        self.tables.iter()
    }
}

#[derive(Serialize, Deserialize)]
struct CartsDocument {
    version: u32,
    tables: BTreeMap<TableId, TableCart>,
}

/// Serialize carts into the persisted representation.
pub fn encode(carts: &TableCarts) -> DomainResult<Vec<u8>> {
    let doc = CartsDocument {
        version: CARTS_FORMAT_VERSION,
        tables: carts.tables.clone(),
    };
    serde_json::to_vec(&doc).map_err(|e| DomainError::validation(format!("encode carts: {e}")))
}

/// Parse the persisted representation back into carts.
pub fn decode(bytes: &[u8]) -> DomainResult<TableCarts> {
    let doc: CartsDocument =
        serde_json::from_slice(bytes).map_err(|e| DomainError::decode(e.to_string()))?;

    if doc.version != CARTS_FORMAT_VERSION {
        return Err(DomainError::decode(format!(
            "unsupported carts format version {}",
            doc.version
        )));
    }

    for (key, cart) in &doc.tables {
        if *key != cart.table_id {
            return Err(DomainError::decode(format!(
                "cart stored under {key} belongs to table {}",
                cart.table_id
            )));
        }
    }

    Ok(TableCarts { tables: doc.tables })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart_with(lines: &[(&str, i64, u64)]) -> TableCart {
        let mut cart = TableCart::new(TableId::new(), Utc::now());
        for (product, qty, price) in lines {
            cart.add_item(*product, format!("{product} name"), *qty, *price)
                .unwrap();
        }
        cart
    }

    #[test]
    fn adding_same_product_merges_lines() {
        let cart = cart_with(&[("espresso", 1, 250), ("espresso", 2, 250)]);
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity, 3);
        assert_eq!(cart.total(), 750);
    }

    #[test]
    fn zero_or_negative_quantity_is_rejected() {
        let mut cart = TableCart::new(TableId::new(), Utc::now());
        assert!(matches!(
            cart.add_item("tea", "Tea", 0, 100),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            cart.add_item("tea", "Tea", -1, 100),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn merging_past_the_quantity_limit_is_rejected() {
        let mut cart = cart_with(&[("tea", i64::MAX - 1, 1)]);
        assert!(matches!(
            cart.add_item("tea", "Tea", 2, 1),
            Err(DomainError::Validation(_))
        ));
        assert_eq!(cart.lines()[0].quantity, i64::MAX - 1);
    }

    #[test]
    fn set_quantity_zero_removes_line() {
        let mut cart = cart_with(&[("bagel", 1, 300), ("juice", 1, 400)]);
        cart.set_quantity("bagel", 0).unwrap();
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.total(), 400);
        assert_eq!(cart.remove_item("bagel"), Err(DomainError::NotFound));
    }

    #[test]
    fn line_numbers_keep_increasing_after_removal() {
        let mut cart = cart_with(&[("a", 1, 1), ("b", 1, 1)]);
        cart.remove_item("a").unwrap();
        cart.add_item("c", "C", 1, 1).unwrap();
        let numbers: Vec<u32> = cart.lines().iter().map(|l| l.line_no).collect();
        assert_eq!(numbers, vec![2, 3]);
    }

    #[test]
    fn open_reuses_existing_cart() {
        let mut carts = TableCarts::new();
        let table = TableId::new();
        carts.open(table, Utc::now()).add_item("soup", "Soup", 1, 500).unwrap();
        carts.open(table, Utc::now()).add_item("soup", "Soup", 1, 500).unwrap();

        assert_eq!(carts.len(), 1);
        assert_eq!(carts.get(table).unwrap().total(), 1000);

        let closed = carts.close(table).unwrap();
        assert_eq!(closed.lines()[0].quantity, 2);
        assert!(carts.is_empty());
    }

    #[test]
    fn decode_restores_encoded_carts() {
        let mut carts = TableCarts::new();
        let t1 = TableId::new();
        let t2 = TableId::new();
        carts.open(t1, Utc::now()).add_item("pizza", "Pizza", 2, 1200).unwrap();
        carts.open(t2, Utc::now()).add_item("water", "Water", 1, 150).unwrap();

        let decoded = decode(&encode(&carts).unwrap()).unwrap();
        assert_eq!(decoded, carts);
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let bytes = br#"{"version":99,"tables":{}}"#;
        assert!(matches!(decode(bytes), Err(DomainError::Decode(_))));
    }

    #[test]
    fn decode_rejects_mismatched_table_key() {
        let cart = cart_with(&[("x", 1, 1)]);
        let other = TableId::new();
        let mut tables = serde_json::Map::new();
        tables.insert(other.to_string(), serde_json::to_value(&cart).unwrap());
        let json = serde_json::json!({
            "version": CARTS_FORMAT_VERSION,
            "tables": tables,
        });
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(matches!(decode(&bytes), Err(DomainError::Decode(_))));
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: the total does not depend on the order items were rung up.
            #[test]
            fn total_is_order_independent(
                items in prop::collection::vec(("[a-e]", 1i64..20), 1..30)
            ) {
                // A product always carries the same price.
                let price_of = |p: &str| p.as_bytes()[0] as u64 * 10;

                let mut forward = TableCart::new(TableId::new(), Utc::now());
                let mut backward = TableCart::new(TableId::new(), Utc::now());
                for (p, q) in &items {
                    forward.add_item(p.clone(), "", *q, price_of(p)).unwrap();
                }
                for (p, q) in items.iter().rev() {
                    backward.add_item(p.clone(), "", *q, price_of(p)).unwrap();
                }

                let expected: u64 = items.iter().map(|(p, q)| price_of(p) * *q as u64).sum();
                prop_assert_eq!(forward.total(), expected);
                prop_assert_eq!(backward.total(), expected);
            }
        }
    }
}
