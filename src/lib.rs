//! Handheld inclinometer core: attitude sources, the orientation tracker with
//! its level classification, and the sighting height calculation.

pub mod config;
pub mod data_provider;
pub mod height;
pub mod orientation;
#[cfg(feature = "ros")]
pub mod ros_data_provider;
pub mod serial_data_provider;
