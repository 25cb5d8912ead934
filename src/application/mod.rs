//! Application services layer.

pub mod error;
pub mod pages;
pub mod repos;
