//! Authorization and booking core for organization-owned lending inventory.
//!
//! The decision pipeline for a booking runs rights resolution, the
//! authorization gate, per-item availability, order construction, and deposit
//! computation; status changes run resolution, the gate, and the per-item
//! lifecycle. Transport and timer concerns stay outside; the service layer is
//! the boundary.

pub mod availability;
pub mod deposit;
pub mod error;
pub mod model;
pub mod privilege;
pub mod reminder;
pub mod rights;
pub mod service;
pub mod status;
pub mod store;
