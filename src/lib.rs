//! ofgate - OpenFlow gateway controller
//!
//! Drives two OpenFlow 1.3 switches: one as a MAC-learning switch for the
//! hosts, the other as a gateway that answers ARP for both subnets and
//! translates ICMP echo between the inside hosts and one public address.

pub mod config;
pub mod controller;
pub mod error;
pub mod openflow;
pub mod protocol;
pub mod southbound;
pub mod telemetry;

pub use error::{Error, Result};
