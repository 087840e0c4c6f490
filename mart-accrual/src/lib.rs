//! Mart Accrual Client
//!
//! HTTP client for the external accrual oracle: the service that computes
//! the reward amount for each order number.

#![warn(clippy::all)]

mod client;

pub use client::{AccrualClient, AccrualError, AccrualLookup, AccrualStatus, OrderAccrual};
