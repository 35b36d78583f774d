//! Cart item identity for snapshot merging.
//!
//! Tool servers are inconsistent about ids: some send stable opaque ids,
//! some send row numbers that change between calls. The strategy is a trait
//! so a server that guarantees stable ids can swap in a stricter rule.

use super::types::{normalize_text, CartItem};

/// Decides whether two cart lines describe the same product.
pub trait ItemIdentity: Send + Sync {
    /// Whether `id` can be relied on by itself.
    fn is_trusted_id(&self, id: &str) -> bool;

    /// Same product: by id when both ids are trusted and the names agree,
    /// otherwise by normalized name.
    fn same_item(&self, a: &CartItem, b: &CartItem) -> bool {
        let name_a = normalize_text(&a.name);
        let name_b = normalize_text(&b.name);
        let names_agree = name_a == name_b;

        if names_agree && self.is_trusted_id(&a.id) && self.is_trusted_id(&b.id) {
            return a.id.trim() == b.id.trim();
        }
        names_agree && !name_a.is_empty()
    }
}

/// Treats empty and purely numeric ids as synthetic.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumericIdsAreSynthetic;

impl ItemIdentity for NumericIdsAreSynthetic {
    fn is_trusted_id(&self, id: &str) -> bool {
        let id = id.trim();
        !id.is_empty() && !id.chars().all(|c| c.is_ascii_digit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, name: &str) -> CartItem {
        CartItem {
            id: id.into(),
            name: name.into(),
            price: 1.0,
            quantity: 1,
            image: None,
        }
    }

    #[test]
    fn test_numeric_ids_untrusted() {
        let identity = NumericIdsAreSynthetic;
        assert!(!identity.is_trusted_id("12345"));
        assert!(!identity.is_trusted_id(""));
        assert!(identity.is_trusted_id("sku-12345"));
    }

    #[test]
    fn test_trusted_ids_must_match() {
        let identity = NumericIdsAreSynthetic;
        assert!(identity.same_item(&item("sku-1", "Apple"), &item("sku-1", "apple ")));
        assert!(!identity.same_item(&item("sku-1", "Apple"), &item("sku-2", "Apple")));
    }

    #[test]
    fn test_synthetic_ids_fall_back_to_name() {
        let identity = NumericIdsAreSynthetic;
        assert!(identity.same_item(&item("1", "Apple"), &item("7", "APPLE")));
        assert!(!identity.same_item(&item("1", "Apple"), &item("1", "Banana")));
    }

    #[test]
    fn test_nameless_items_never_match_by_name() {
        let identity = NumericIdsAreSynthetic;
        assert!(!identity.same_item(&item("1", ""), &item("1", "")));
    }
}
