//! Test utilities for `mpcap`
//!
//! Provides synthetic packet generation for exercising the capture path
//! without live traffic.

pub mod packet_generator;

pub use packet_generator::*;
