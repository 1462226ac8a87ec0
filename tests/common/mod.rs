// tests/common/mod.rs

#![allow(dead_code)]

pub use assetdag_test_utils::*;
