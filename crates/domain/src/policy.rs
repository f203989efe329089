//! Authorization policy.
//!
//! Every role and ownership rule of the system lives in [`allow`], so that it
//! can be tested without an HTTP request or a database.

use common::{Actor, Role, UserId};

use crate::order::OrderStatus;

/// Something an actor wants to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    PlaceOrder,
    ViewOrder,
    UpdateOrderStatus(OrderStatus),
    PayOrder,
    ConfirmPayment,
    RefundPayment,
    ViewStock,
    ReserveStock,
    ReleaseStock,
    CommitStock,
    AdjustStock,
    TransferStock,
    ManageStockAlerts,
    ViewWallet,
    TopUpWallet,
    TransferFunds,
}

/// What the action targets, carrying only the facts the policy needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// An order that does not exist yet.
    NewOrder,
    Order {
        customer_id: UserId,
        retailer_id: UserId,
        status: OrderStatus,
    },
    /// A payment, described by the order it pays for.
    Payment {
        payer_id: UserId,
        retailer_id: UserId,
    },
    Inventory,
    Wallet {
        owner_id: UserId,
    },
}

/// Returns true if `actor` may perform `action` on `resource`.
pub fn allow(actor: &Actor, action: Action, resource: &Resource) -> bool {
    use Action::*;

    match (action, resource) {
        (PlaceOrder, Resource::NewOrder) => actor.role == Role::Customer,

        (
            ViewOrder,
            Resource::Order {
                customer_id,
                retailer_id,
                ..
            },
        ) => actor.is_admin() || actor.id == *customer_id || actor.id == *retailer_id,

        (
            UpdateOrderStatus(target),
            Resource::Order {
                customer_id,
                retailer_id,
                status,
            },
        ) => match actor.role {
            Role::Admin => true,
            Role::Retailer => actor.id == *retailer_id,
            Role::Customer => {
                actor.id == *customer_id
                    && target == OrderStatus::Cancelled
                    && *status == OrderStatus::Pending
            }
            Role::WarehouseManager => false,
        },

        (PayOrder, Resource::Order { customer_id, .. }) => {
            actor.is_admin() || actor.id == *customer_id
        }

        (ConfirmPayment, Resource::Payment { .. }) => actor.is_admin(),

        (RefundPayment, Resource::Payment { retailer_id, .. }) => {
            actor.is_admin() || (actor.role == Role::Retailer && actor.id == *retailer_id)
        }

        (ViewStock, Resource::Inventory) => true,

        (ReserveStock | ReleaseStock | CommitStock | AdjustStock, Resource::Inventory) => matches!(
            actor.role,
            Role::Admin | Role::WarehouseManager | Role::Retailer
        ),

        (TransferStock | ManageStockAlerts, Resource::Inventory) => {
            matches!(actor.role, Role::Admin | Role::WarehouseManager)
        }

        (ViewWallet | TopUpWallet | TransferFunds, Resource::Wallet { owner_id }) => {
            actor.id == *owner_id
        }

        _ => false,
    }
}
