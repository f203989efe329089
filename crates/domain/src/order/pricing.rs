//! Order pricing.

use common::Money;
use rust_decimal::Decimal;

use super::{OrderItem, OrderTotals};

/// Tax and shipping rules applied when an order is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingPolicy {
    /// Fraction of the subtotal charged as tax (0.16 is 16%).
    pub tax_rate: Decimal,
    /// Flat shipping fee per order.
    pub shipping_fee: Money,
}

impl PricingPolicy {
    pub fn new(tax_rate: Decimal, shipping_fee: Money) -> Self {
        Self {
            tax_rate,
            shipping_fee,
        }
    }

    /// Prices a set of lines. Tax is rounded to cents, half away from zero.
    pub fn price(&self, items: &[OrderItem]) -> OrderTotals {
        let subtotal: Money = items.iter().map(|item| item.total_price).sum();
        let tax_amount = subtotal.apply_rate(self.tax_rate);
        OrderTotals {
            subtotal,
            tax_amount,
            shipping_amount: self.shipping_fee,
            total_amount: subtotal + tax_amount + self.shipping_fee,
        }
    }
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(16, 2),
            shipping_fee: Money::from_minor(2500),
        }
    }
}
