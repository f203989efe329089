use common::OrderId;
use serde::{Deserialize, Serialize};

const ORDER_PREFIX: &str = "order:";

/// Key shared by every reservation taken for one purpose.
///
/// Orders use `order:<uuid>`; release and commit act on every active
/// reservation carrying the same reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn for_order(order_id: OrderId) -> Self {
        Self(format!("{ORDER_PREFIX}{order_id}"))
    }

    /// The order this reference belongs to, if it is an order reference.
    pub fn order_id(&self) -> Option<OrderId> {
        self.0.strip_prefix(ORDER_PREFIX)?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Reference {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Reference {
    fn from(s: String) -> Self {
        Self(s)
    }
}
