//! Order costing and profitability for the Herrera ERP.
//!
//! [`domain`] holds the pure calculator and period aggregation, [`infra`] the
//! REST client, and [`util`] session storage and display helpers.

pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
