//! Optimistic cart entries.
//!
//! When the user taps "add" the UI shows the line immediately, before any
//! tool has confirmed it. These entries are keyed by vertical, restaurant,
//! id and name so the later authoritative cart can be matched back to them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::ItemIdentity;
use super::types::{normalize_text, CartItem, CartState};

const MISSING_SEGMENT: &str = "-";

/// The product a user acted on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimisticProduct {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub restaurant_name: Option<String>,
}

/// Where the user currently is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimisticScope {
    #[serde(default)]
    pub vertical_id: Option<String>,
    /// Restaurant the session is locked to, if any.
    #[serde(default)]
    pub locked_restaurant: Option<String>,
}

impl OptimisticScope {
    fn is_empty(&self) -> bool {
        non_blank(self.vertical_id.as_deref()).is_none()
            && non_blank(self.locked_restaurant.as_deref()).is_none()
    }

    fn contains(&self, entry: &OptimisticCartEntry) -> bool {
        let vertical_ok = non_blank(self.vertical_id.as_deref())
            .map(|v| normalize_text(v) == normalize_text(&entry.vertical_id))
            .unwrap_or(true);
        let restaurant_ok = match (
            non_blank(self.locked_restaurant.as_deref()),
            non_blank(entry.restaurant_scope.as_deref()),
        ) {
            (Some(locked), Some(entry_scope)) => {
                normalize_text(locked) == normalize_text(entry_scope)
            }
            _ => true,
        };
        vertical_ok && restaurant_ok
    }
}

/// A line shown before the store confirmed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimisticCartEntry {
    pub item: CartItem,
    pub vertical_id: String,
    #[serde(default)]
    pub restaurant_scope: Option<String>,
    pub updated_at: DateTime<Utc>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn segment(value: Option<&str>) -> String {
    non_blank(value)
        .map(normalize_text)
        .unwrap_or_else(|| MISSING_SEGMENT.to_string())
}

// ─── Keys ────────────────────────────────────────────────────────────────────

/// `vertical|restaurant|id|name`, normalized, `-` for missing parts.
///
/// The locked restaurant wins over the product's own restaurant.
pub fn build_optimistic_cart_key(product: &OptimisticProduct, scope: &OptimisticScope) -> String {
    let restaurant = non_blank(scope.locked_restaurant.as_deref())
        .or_else(|| non_blank(product.restaurant_name.as_deref()));
    [
        segment(scope.vertical_id.as_deref()),
        segment(restaurant),
        segment(product.id.as_deref()),
        segment(Some(product.name.as_str())),
    ]
    .join("|")
}

// ─── Lookup ──────────────────────────────────────────────────────────────────

fn most_recent<'a, I>(entries: I) -> Option<&'a OptimisticCartEntry>
where
    I: Iterator<Item = &'a OptimisticCartEntry>,
{
    entries.max_by_key(|e| e.updated_at)
}

/// Find the entry the user most likely means by `name`.
///
/// Candidates rank as in-scope exact, in-scope substring, then exact and
/// substring matches from any scope. Within a rank the most recently
/// updated entry wins. Without scope information every entry is in scope.
pub fn find_optimistic_by_name<'a>(
    entries: &'a [OptimisticCartEntry],
    name: &str,
    scope: &OptimisticScope,
) -> Option<&'a OptimisticCartEntry> {
    let wanted = normalize_text(name);
    if wanted.is_empty() {
        return None;
    }

    let exact = |e: &&OptimisticCartEntry| normalize_text(&e.item.name) == wanted;
    let fuzzy = |e: &&OptimisticCartEntry| {
        let have = normalize_text(&e.item.name);
        !have.is_empty() && (have.contains(&wanted) || wanted.contains(&have))
    };

    let scoped = in_scope(scope);
    most_recent(entries.iter().filter(scoped).filter(exact))
        .or_else(|| most_recent(entries.iter().filter(scoped).filter(fuzzy)))
        .or_else(|| most_recent(entries.iter().filter(exact)))
        .or_else(|| most_recent(entries.iter().filter(fuzzy)))
}

/// Most recent entry with the given item id, in-scope entries first.
pub fn find_optimistic_by_id<'a>(
    entries: &'a [OptimisticCartEntry],
    id: &str,
    scope: &OptimisticScope,
) -> Option<&'a OptimisticCartEntry> {
    let wanted = normalize_text(id);
    if wanted.is_empty() {
        return None;
    }
    let same_id = |e: &&OptimisticCartEntry| normalize_text(&e.item.id) == wanted;
    let scoped = in_scope(scope);
    most_recent(entries.iter().filter(scoped).filter(same_id))
        .or_else(|| most_recent(entries.iter().filter(same_id)))
}

fn in_scope(scope: &OptimisticScope) -> impl Fn(&&OptimisticCartEntry) -> bool + Copy + '_ {
    let scoped = !scope.is_empty();
    move |e: &&OptimisticCartEntry| !scoped || scope.contains(e)
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

/// Pending optimistic lines keyed by their optimistic key.
#[derive(Debug, Clone, Default)]
pub struct OptimisticCart {
    entries: HashMap<String, OptimisticCartEntry>,
}

impl OptimisticCart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or replace the optimistic line for `product`; returns its key.
    ///
    /// A quantity of zero records a pending removal.
    pub fn upsert(
        &mut self,
        product: &OptimisticProduct,
        item: CartItem,
        scope: &OptimisticScope,
    ) -> String {
        let key = build_optimistic_cart_key(product, scope);
        let restaurant_scope = non_blank(scope.locked_restaurant.as_deref())
            .or_else(|| non_blank(product.restaurant_name.as_deref()))
            .map(str::to_string);
        let entry = OptimisticCartEntry {
            item,
            vertical_id: scope.vertical_id.clone().unwrap_or_default(),
            restaurant_scope,
            updated_at: Utc::now(),
        };
        self.entries.insert(key.clone(), entry);
        key
    }

    pub fn remove(&mut self, key: &str) -> Option<OptimisticCartEntry> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&OptimisticCartEntry> {
        self.entries.get(key)
    }

    /// Pending entries, oldest first.
    pub fn entries(&self) -> Vec<OptimisticCartEntry> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.updated_at);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries the authoritative cart has settled.
    ///
    /// An add is settled once the cart holds the item with at least the
    /// optimistic quantity; a removal once the item is gone. Returns the
    /// cart lines that confirmed pending adds.
    pub fn reconcile_with(
        &mut self,
        cart: &CartState,
        identity: &dyn ItemIdentity,
    ) -> Vec<CartItem> {
        let mut confirmed = Vec::new();
        self.entries.retain(|key, entry| {
            let found = cart
                .items
                .iter()
                .find(|line| identity.same_item(line, &entry.item));
            let settled = match found {
                Some(line) if entry.item.quantity > 0 && line.quantity >= entry.item.quantity => {
                    confirmed.push(line.clone());
                    true
                }
                None if entry.item.quantity == 0 => true,
                _ => false,
            };
            if settled {
                tracing::debug!(key = %key, "optimistic cart entry settled");
            }
            !settled
        });
        confirmed
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
