//! Cart data types.

use serde::{Deserialize, Serialize};

/// One line in a cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: String,
    pub name: String,
    /// Unit price.
    pub price: f64,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl CartItem {
    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

/// A full cart as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartState {
    pub items: Vec<CartItem>,
    pub subtotal: f64,
    pub delivery_fee: f64,
    pub total: f64,
}

impl CartState {
    /// Build a cart whose subtotal and total are derived from its items.
    pub fn from_items(items: Vec<CartItem>, delivery_fee: f64) -> Self {
        let subtotal = subtotal_of(&items);
        Self {
            items,
            subtotal,
            delivery_fee,
            total: round_cents(subtotal + delivery_fee),
        }
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Σ price × quantity, rounded to cents.
pub fn subtotal_of(items: &[CartItem]) -> f64 {
    round_cents(items.iter().map(CartItem::line_total).sum())
}

pub(crate) fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Lower-case and collapse whitespace runs to single spaces.
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
