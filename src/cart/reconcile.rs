//! Cart snapshot reconciliation.
//!
//! Every tool result that carries a cart is a snapshot. Most store tools
//! return the whole cart, so the latest snapshot is authoritative. Some food
//! stores answer an add call with only the lines touched by that call; for
//! those verticals an additive snapshot that is missing earlier lines is
//! merged into the previous cart instead of replacing it.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::identity::{ItemIdentity, NumericIdsAreSynthetic};
use super::parser::{CartPayloadParser, JsonCartParser};
use super::types::{round_cents, subtotal_of, CartItem, CartState};
use super::CartConfig;
use crate::inference::types::{ChatMessage, ContentBlock, Role};

const ADDITIVE_TOOL_MARKERS: [&str; 5] = ["add", "insert", "append", "add_item", "add_to_cart"];
const ADDITIVE_ACTION_MARKERS: [&str; 4] = ["add", "append", "increment", "increase"];

/// A cart observed in one tool result, with the call that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CartSnapshot {
    /// Name of the originating tool; empty when it could not be resolved.
    pub tool_name: String,
    pub input: Option<Value>,
    pub cart: CartState,
}

// ─── Snapshot Extraction ─────────────────────────────────────────────────────

/// Collect cart snapshots from the history in order.
///
/// The originating tool of a result is the tool use with the matching id in
/// the same message, or failing that the nearest preceding tool use.
pub fn extract_cart_snapshots(
    messages: &[ChatMessage],
    parser: &dyn CartPayloadParser,
) -> Vec<CartSnapshot> {
    let mut snapshots = Vec::new();

    for message in messages.iter().filter(|m| m.role == Role::Assistant) {
        let Some(blocks) = message.blocks() else {
            continue;
        };

        let tool_uses: HashMap<&str, (&str, Option<&Value>)> = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), (name.as_str(), input.as_ref())))
                }
                _ => None,
            })
            .collect();

        for (index, block) in blocks.iter().enumerate() {
            let ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } = block
            else {
                continue;
            };

            let (tool_name, input) = tool_uses
                .get(tool_use_id.as_str())
                .copied()
                .or_else(|| nearest_preceding_tool_use(&blocks[..index]))
                .unwrap_or(("", None));

            if let Some(cart) = parser.parse(tool_name, content) {
                snapshots.push(CartSnapshot {
                    tool_name: tool_name.to_string(),
                    input: input.cloned(),
                    cart,
                });
            }
        }
    }

    snapshots
}

fn nearest_preceding_tool_use(blocks: &[ContentBlock]) -> Option<(&str, Option<&Value>)> {
    blocks.iter().rev().find_map(|b| match b {
        ContentBlock::ToolUse { name, input, .. } => Some((name.as_str(), input.as_ref())),
        _ => None,
    })
}

// ─── Additive Detection ──────────────────────────────────────────────────────

/// Whether a tool call adds to the cart rather than restating it.
pub fn is_additive_operation(tool_name: &str, input: Option<&Value>) -> bool {
    let name = tool_name.to_lowercase();
    if ADDITIVE_TOOL_MARKERS.iter().any(|m| name.contains(m)) {
        return true;
    }

    let Some(input) = input.and_then(Value::as_object) else {
        return false;
    };
    ["action", "operation"]
        .iter()
        .filter_map(|k| input.get(*k).and_then(Value::as_str))
        .map(str::to_lowercase)
        .any(|action| ADDITIVE_ACTION_MARKERS.iter().any(|m| action.contains(m)))
}

// ─── Merge ───────────────────────────────────────────────────────────────────

/// Union `next` into `previous` by item identity.
///
/// Shared lines keep the higher quantity and the better price and image.
/// The delivery fee comes from `next` unless it is not finite; the total
/// never drops below subtotal plus fee.
pub fn merge_additive(
    previous: &CartState,
    next: &CartState,
    identity: &dyn ItemIdentity,
) -> CartState {
    let mut items: Vec<CartItem> = previous.items.clone();
    for incoming in &next.items {
        match items.iter_mut().find(|e| identity.same_item(e, incoming)) {
            Some(existing) => merge_item(existing, incoming),
            None => items.push(incoming.clone()),
        }
    }

    let subtotal = subtotal_of(&items);
    let delivery_fee = if next.delivery_fee.is_finite() {
        next.delivery_fee
    } else {
        previous.delivery_fee
    };
    let total = round_cents(subtotal + delivery_fee).max(next.total);

    CartState {
        items,
        subtotal,
        delivery_fee,
        total,
    }
}

fn merge_item(existing: &mut CartItem, incoming: &CartItem) {
    existing.quantity = existing.quantity.max(incoming.quantity);

    if incoming.price > 0.0 {
        existing.price = incoming.price;
    }

    let has_image = |img: &Option<String>| img.as_deref().is_some_and(|s| !s.trim().is_empty());
    if has_image(&incoming.image) {
        existing.image = incoming.image.clone();
    } else if !has_image(&existing.image) {
        existing.image = None;
    }

    if existing.id.trim().is_empty() {
        existing.id = incoming.id.clone();
    }
}

fn missing_from(previous: &CartState, next: &CartState, identity: &dyn ItemIdentity) -> bool {
    previous
        .items
        .iter()
        .any(|old| !next.items.iter().any(|new| identity.same_item(old, new)))
}

// ─── Reconciler ──────────────────────────────────────────────────────────────

/// Resolves the cart to display from conversation history.
pub struct CartReconciler {
    reconciling_verticals: HashSet<String>,
    parser: Box<dyn CartPayloadParser>,
    identity: Box<dyn ItemIdentity>,
}

impl CartReconciler {
    pub fn new(config: &CartConfig) -> Self {
        Self {
            reconciling_verticals: config
                .reconciling_verticals
                .iter()
                .map(|v| v.trim().to_lowercase())
                .collect(),
            parser: Box::new(JsonCartParser),
            identity: Box::new(NumericIdsAreSynthetic),
        }
    }

    pub fn with_parser(mut self, parser: impl CartPayloadParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    pub fn with_identity(mut self, identity: impl ItemIdentity + 'static) -> Self {
        self.identity = Box::new(identity);
        self
    }

    pub fn is_reconciling(&self, vertical: &str) -> bool {
        self.reconciling_verticals
            .contains(&vertical.trim().to_lowercase())
    }

    pub fn identity(&self) -> &dyn ItemIdentity {
        self.identity.as_ref()
    }

    pub fn snapshots(&self, messages: &[ChatMessage]) -> Vec<CartSnapshot> {
        extract_cart_snapshots(messages, self.parser.as_ref())
    }

    /// The cart to display for `vertical`, or `None` if no tool result in
    /// the history carried a cart.
    pub fn resolve_cart(&self, messages: &[ChatMessage], vertical: &str) -> Option<CartState> {
        let snapshots = self.snapshots(messages);

        if !self.is_reconciling(vertical) {
            return snapshots.into_iter().last().map(|s| s.cart);
        }

        let mut snapshots = snapshots.into_iter();
        let mut current = snapshots.next()?.cart;
        for snapshot in snapshots {
            let additive = is_additive_operation(&snapshot.tool_name, snapshot.input.as_ref());
            current = if additive && missing_from(&current, &snapshot.cart, self.identity()) {
                tracing::debug!(
                    vertical,
                    tool = %snapshot.tool_name,
                    "merging partial cart snapshot"
                );
                merge_additive(&current, &snapshot.cart, self.identity())
            } else {
                snapshot.cart
            };
        }
        Some(current)
    }
}

/// Free-function form of [`CartReconciler::resolve_cart`].
pub fn resolve_cart(
    messages: &[ChatMessage],
    vertical: &str,
    reconciler: &CartReconciler,
) -> Option<CartState> {
    reconciler.resolve_cart(messages, vertical)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
