//! Drivers for devices built on the ranging primitives.

pub mod hc_sr04;
