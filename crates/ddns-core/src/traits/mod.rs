//! Core traits for the DDNS system
//!
//! This module defines the two contracts every backend integration implements.
//!
//! - [`AddressDetector`]: Find the address that should be published
//! - [`DnsUpdateHandler`]: Read, create and update the published record

pub mod address_detector;
pub mod dns_update_handler;

pub use address_detector::AddressDetector;
pub use dns_update_handler::{DnsUpdateHandler, RECORD_COMMENT};
