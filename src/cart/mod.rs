//! Cart: resolving the displayed cart from tool results.
//!
//! Submodules:
//! - `types`: Cart lines and cart state
//! - `identity`: When two cart lines are the same product
//! - `parser`: Extracting carts from tool-result payloads
//! - `reconcile`: Folding snapshots into the cart to display
//! - `optimistic`: Unconfirmed lines shown ahead of the store

pub mod identity;
pub mod optimistic;
pub mod parser;
pub mod reconcile;
pub mod types;

use serde::{Deserialize, Serialize};

pub use identity::{ItemIdentity, NumericIdsAreSynthetic};
pub use optimistic::{
    build_optimistic_cart_key, find_optimistic_by_id, find_optimistic_by_name, OptimisticCart,
    OptimisticCartEntry, OptimisticProduct, OptimisticScope,
};
pub use parser::{CartPayloadParser, JsonCartParser};
pub use reconcile::{
    extract_cart_snapshots, is_additive_operation, merge_additive, resolve_cart, CartReconciler,
    CartSnapshot,
};
pub use types::{CartItem, CartState};

/// Cart reconciliation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CartConfig {
    /// Verticals whose stores may answer an add with a partial cart.
    pub reconciling_verticals: Vec<String>,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            reconciling_verticals: vec!["food".into(), "foodorder".into()],
        }
    }
}
