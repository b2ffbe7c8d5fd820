#![doc = include_str!("../README.md")]

mod allocator;
mod conventions;
mod error;
#[cfg(test)]
mod mock;
mod memory;
mod protocol;
mod range;
mod registry;
mod renewal;

pub use crate::allocator::*;
pub use crate::conventions::*;
pub use crate::error::*;
pub use crate::memory::*;
pub use crate::protocol::*;
pub use crate::range::*;
pub use crate::registry::*;
