//! Mart Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains the order-number validator, order/balance/withdrawal types,
//! and domain rules.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod balance;
pub mod number;
pub mod order;
pub mod user;

// Re-export commonly used types
pub use balance::{Balance, Withdrawal};
pub use number::{DomainError, OrderNumber};
pub use order::{Order, OrderStatus};
pub use user::User;
