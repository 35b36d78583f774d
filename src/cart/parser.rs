//! Cart payload parsing for tool results.
//!
//! Tool servers report carts in their own shapes. `JsonCartParser` covers the
//! common JSON layouts; a server with an exotic format gets its own
//! `CartPayloadParser`.

use serde_json::{Map, Value};

use super::types::{round_cents, subtotal_of, CartItem, CartState};
use crate::agent_core::tool_errors::extract_tool_result_text;

/// Extracts a cart from raw tool-result content, if it carries one.
pub trait CartPayloadParser: Send + Sync {
    fn parse(&self, tool_name: &str, content: &Value) -> Option<CartState>;
}

const ID_KEYS: [&str; 4] = ["id", "item_id", "product_id", "sku"];
const NAME_KEYS: [&str; 3] = ["name", "title", "product_name"];
const PRICE_KEYS: [&str; 3] = ["price", "unit_price", "final_price"];
const QUANTITY_KEYS: [&str; 3] = ["quantity", "qty", "count"];
const IMAGE_KEYS: [&str; 4] = ["image", "image_url", "imageUrl", "thumbnail"];
const ITEMS_KEYS: [&str; 3] = ["items", "cart_items", "line_items"];
const SUBTOTAL_KEYS: [&str; 3] = ["subtotal", "sub_total", "item_total"];
const DELIVERY_KEYS: [&str; 3] = ["delivery_fee", "deliveryFee", "delivery_charges"];
const TOTAL_KEYS: [&str; 3] = ["total", "grand_total", "to_pay"];

/// Parses JSON carts found as `{cart: {...}}`, `{data: {cart: {...}}}`, or a
/// bare object with an items array.
///
/// A bare items object only counts as a cart when it also reports a total
/// or fee, or when the tool name mentions a cart, so product search
/// listings are not mistaken for carts.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCartParser;

impl CartPayloadParser for JsonCartParser {
    fn parse(&self, tool_name: &str, content: &Value) -> Option<CartState> {
        let cart_tool = tool_name.to_lowercase().contains("cart");
        candidate_documents(content)
            .iter()
            .find_map(|doc| locate_cart(doc, cart_tool))
            .and_then(parse_cart_object)
    }
}

/// JSON documents worth inspecting, in order of preference.
fn candidate_documents(content: &Value) -> Vec<Value> {
    let mut docs = Vec::new();
    match content {
        Value::Object(_) => docs.push(content.clone()),
        Value::Array(parts) => {
            for part in parts {
                let text = extract_tool_result_text(&Value::Array(vec![part.clone()]));
                docs.extend(parse_embedded_json(&text));
            }
            if parts.len() > 1 {
                docs.extend(parse_embedded_json(&extract_tool_result_text(content)));
            }
        }
        Value::String(text) => docs.extend(parse_embedded_json(text)),
        _ => {}
    }
    docs
}

/// Parse `text` as JSON, falling back to the outermost `{...}` span when the
/// server wraps the payload in prose.
fn parse_embedded_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value.is_object().then_some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(Value::is_object)
}

fn locate_cart(doc: &Value, cart_tool: bool) -> Option<&Map<String, Value>> {
    let root = doc.as_object()?;

    if let Some(cart) = root.get("cart").and_then(Value::as_object) {
        return has_items(cart).then_some(cart);
    }
    if let Some(data) = root.get("data").and_then(Value::as_object) {
        if let Some(cart) = data.get("cart").and_then(Value::as_object) {
            return has_items(cart).then_some(cart);
        }
        if has_items(data) && (cart_tool || has_totals(data)) {
            return Some(data);
        }
    }
    (has_items(root) && (cart_tool || has_totals(root))).then_some(root)
}

fn has_items(obj: &Map<String, Value>) -> bool {
    ITEMS_KEYS
        .iter()
        .any(|k| obj.get(*k).map(Value::is_array).unwrap_or(false))
}

fn has_totals(obj: &Map<String, Value>) -> bool {
    SUBTOTAL_KEYS
        .iter()
        .chain(DELIVERY_KEYS.iter())
        .chain(TOTAL_KEYS.iter())
        .any(|k| obj.contains_key(*k))
}

fn parse_cart_object(cart: &Map<String, Value>) -> Option<CartState> {
    let raw_items = ITEMS_KEYS
        .iter()
        .find_map(|k| cart.get(*k).and_then(Value::as_array))?;
    let items: Vec<CartItem> = raw_items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(parse_item)
        .collect();

    let derived_subtotal = subtotal_of(&items);
    let subtotal = first_number(cart, &SUBTOTAL_KEYS).unwrap_or(derived_subtotal);
    let delivery_fee = first_number(cart, &DELIVERY_KEYS).unwrap_or(0.0);
    let total =
        first_number(cart, &TOTAL_KEYS).unwrap_or_else(|| round_cents(subtotal + delivery_fee));

    Some(CartState {
        items,
        subtotal,
        delivery_fee,
        total,
    })
}

fn parse_item(obj: &Map<String, Value>) -> Option<CartItem> {
    let name = first_string(obj, &NAME_KEYS)?;
    if name.trim().is_empty() {
        return None;
    }
    let quantity = first_number(obj, &QUANTITY_KEYS)
        .map(|q| q.max(0.0).round() as u32)
        .unwrap_or(1);

    Some(CartItem {
        id: first_string(obj, &ID_KEYS).unwrap_or_default(),
        name,
        price: first_number(obj, &PRICE_KEYS).unwrap_or(0.0),
        quantity,
        image: first_string(obj, &IMAGE_KEYS).filter(|s| !s.trim().is_empty()),
    })
}

/// First key present as a string or number, rendered as a string.
fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First key present as a finite number or numeric string.
fn first_number(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| {
        let n = match obj.get(*k)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().trim_start_matches('₹').trim().parse().ok(),
            _ => None,
        }?;
        n.is_finite().then_some(n)
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_nested_cart_with_aliases() {
        let content = json!({
            "data": {
                "cart": {
                    "items": [
                        {"item_id": 42, "title": "Apple", "unit_price": "1.50", "qty": 2, "image_url": "a.png"}
                    ],
                    "delivery_fee": 3
                }
            }
        });
        let cart = JsonCartParser.parse("get_cart", &content).unwrap();
        assert_eq!(cart.items.len(), 1);
        let item = &cart.items[0];
        assert_eq!(item.id, "42");
        assert_eq!(item.name, "Apple");
        assert_eq!(item.price, 1.5);
        assert_eq!(item.quantity, 2);
        assert_eq!(item.image.as_deref(), Some("a.png"));
        assert_eq!(cart.subtotal, 3.0);
        assert_eq!(cart.total, 6.0);
    }

    #[test]
    fn test_parses_text_block_content() {
        let payload = json!({"cart": {"items": [{"id": "sku-1", "name": "Banana", "price": 0.5}], "total": 0.5}});
        let content = json!([{"type": "text", "text": payload.to_string()}]);
        let cart = JsonCartParser.parse("add_item", &content).unwrap();
        assert_eq!(cart.items[0].name, "Banana");
        assert_eq!(cart.items[0].quantity, 1);
        assert_eq!(cart.total, 0.5);
    }

    #[test]
    fn test_parses_json_wrapped_in_prose() {
        let content = json!("Updated cart: {\"cart\": {\"items\": [{\"name\": \"Milk\", \"price\": 2}]}} done");
        let cart = JsonCartParser.parse("update_item", &content).unwrap();
        assert_eq!(cart.items[0].name, "Milk");
    }

    #[test]
    fn test_empty_cart_is_a_cart() {
        let content = json!({"cart": {"items": []}});
        let cart = JsonCartParser.parse("clear_cart", &content).unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.total, 0.0);
    }

    #[test]
    fn test_search_listing_is_not_a_cart() {
        let content = json!({"items": [{"id": "p1", "name": "Apple", "price": 1.0}]});
        assert!(JsonCartParser.parse("search_products", &content).is_none());
        assert!(JsonCartParser.parse("view_cart", &content).is_some());
    }

    #[test]
    fn test_non_json_is_ignored() {
        assert!(JsonCartParser.parse("get_cart", &json!("Cart is empty")).is_none());
        assert!(JsonCartParser.parse("get_cart", &Value::Null).is_none());
    }

    #[test]
    fn test_nameless_items_are_skipped() {
        let content = json!({"cart": {"items": [{"id": "x", "price": 1}, {"name": "Tea", "price": 1}]}});
        let cart = JsonCartParser.parse("get_cart", &content).unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].name, "Tea");
    }
}
