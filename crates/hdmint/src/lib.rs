#![doc = include_str!("../README.md")]

mod address;
mod derivation;
mod entropy;
mod error;
mod keys;
mod mnemonic;
mod path;
mod record;
#[cfg(feature = "serde")]
mod serde;


pub use crate::address::*;
pub use crate::derivation::*;
pub use crate::entropy::*;
pub use crate::error::*;
pub use crate::keys::*;
pub use crate::mnemonic::*;
pub use crate::path::*;
pub use crate::record::*;
