mod client;
mod database;

pub use client::*;
pub use database::*;
