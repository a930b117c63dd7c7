#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Small building blocks shared by the servios crates.

pub mod humantime_serde;
pub mod secret_string;

pub use secret_string::SecretString;
