#![allow(dead_code)]

pub mod catalog;

pub use catalog::{FixedBuildLookup, release_body, row};
