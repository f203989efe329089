pub mod catalog;
pub mod events;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod wallets;
