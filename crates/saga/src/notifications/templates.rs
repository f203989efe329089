use common::{OrderId, UserId};
use domain::{OrderNumber, OrderStatus};
use serde::{Deserialize, Serialize};

use super::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    OrderPlaced,
    OrderConfirmed,
    OrderProcessing,
    OrderReady,
    OrderShipped,
    OrderDelivered,
    OrderCancelled,
    DeliveryAssigned,
    DeliveryStarted,
    DeliveryCompleted,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::OrderPlaced => "order_placed",
            NotificationType::OrderConfirmed => "order_confirmed",
            NotificationType::OrderProcessing => "order_processing",
            NotificationType::OrderReady => "order_ready",
            NotificationType::OrderShipped => "order_shipped",
            NotificationType::OrderDelivered => "order_delivered",
            NotificationType::OrderCancelled => "order_cancelled",
            NotificationType::DeliveryAssigned => "delivery_assigned",
            NotificationType::DeliveryStarted => "delivery_started",
            NotificationType::DeliveryCompleted => "delivery_completed",
        }
    }

    /// The notification sent when an order enters `status`.
    pub fn for_status(status: OrderStatus) -> Option<Self> {
        match status {
            OrderStatus::Pending => None,
            OrderStatus::Confirmed => Some(NotificationType::OrderConfirmed),
            OrderStatus::Processing => Some(NotificationType::OrderProcessing),
            OrderStatus::ReadyForPickup => Some(NotificationType::OrderReady),
            OrderStatus::OutForDelivery => Some(NotificationType::OrderShipped),
            OrderStatus::Delivered => Some(NotificationType::OrderDelivered),
            OrderStatus::Cancelled => Some(NotificationType::OrderCancelled),
        }
    }

    pub fn is_delivery_event(&self) -> bool {
        matches!(
            self,
            NotificationType::DeliveryAssigned
                | NotificationType::DeliveryStarted
                | NotificationType::DeliveryCompleted
        )
    }

    pub fn title(&self) -> &'static str {
        match self {
            NotificationType::OrderPlaced => "Order Placed",
            NotificationType::OrderConfirmed => "Order Confirmed",
            NotificationType::OrderProcessing => "Order Processing",
            NotificationType::OrderReady => "Order Ready",
            NotificationType::OrderShipped => "Order Shipped",
            NotificationType::OrderDelivered => "Order Delivered",
            NotificationType::OrderCancelled => "Order Cancelled",
            NotificationType::DeliveryAssigned => "Driver Assigned",
            NotificationType::DeliveryStarted => "Delivery Started",
            NotificationType::DeliveryCompleted => "Delivery Complete",
        }
    }

    /// Body text; order events interpolate the order number.
    pub fn body(&self, order_number: &str) -> String {
        match self {
            NotificationType::OrderPlaced => format!("Your order #{order_number} has been placed"),
            NotificationType::OrderConfirmed => {
                format!("Your order #{order_number} has been confirmed")
            }
            NotificationType::OrderProcessing => {
                format!("Your order #{order_number} is being prepared")
            }
            NotificationType::OrderReady => {
                format!("Your order #{order_number} is ready for pickup")
            }
            NotificationType::OrderShipped => format!("Your order #{order_number} is on the way"),
            NotificationType::OrderDelivered => {
                format!("Your order #{order_number} has been delivered")
            }
            NotificationType::OrderCancelled => {
                format!("Your order #{order_number} has been cancelled")
            }
            NotificationType::DeliveryAssigned => {
                "A driver has been assigned to your delivery".to_string()
            }
            NotificationType::DeliveryStarted => "Your order is being delivered".to_string(),
            NotificationType::DeliveryCompleted => "Your order has been delivered".to_string(),
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationType {
    type Err = common::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_placed" => Ok(NotificationType::OrderPlaced),
            "order_confirmed" => Ok(NotificationType::OrderConfirmed),
            "order_processing" => Ok(NotificationType::OrderProcessing),
            "order_ready" => Ok(NotificationType::OrderReady),
            "order_shipped" => Ok(NotificationType::OrderShipped),
            "order_delivered" => Ok(NotificationType::OrderDelivered),
            "order_cancelled" => Ok(NotificationType::OrderCancelled),
            "delivery_assigned" => Ok(NotificationType::DeliveryAssigned),
            "delivery_started" => Ok(NotificationType::DeliveryStarted),
            "delivery_completed" => Ok(NotificationType::DeliveryCompleted),
            other => Err(common::ParseEnumError::new("notification event", other)),
        }
    }
}

impl Notification {
    pub fn for_order(
        user_id: UserId,
        event_type: NotificationType,
        order_id: OrderId,
        order_number: &OrderNumber,
    ) -> Self {
        Self::new(
            user_id,
            event_type,
            event_type.title(),
            event_type.body(order_number.as_str()),
            serde_json::json!({
                "order_id": order_id,
                "order_number": order_number,
            }),
        )
    }

    pub fn for_delivery(
        user_id: UserId,
        event_type: NotificationType,
        delivery_id: Option<String>,
    ) -> Self {
        Self::new(
            user_id,
            event_type,
            event_type.title(),
            event_type.body(""),
            serde_json::json!({ "delivery_id": delivery_id }),
        )
    }
}
