#![doc = include_str!("../README.md")]

pub use bytes;
pub use rasn_ldap;

pub use controls::*;
pub use handler::*;
pub use merge::*;
pub use model::*;
pub use options::*;

pub mod ber;
pub mod controls;
pub mod error;
pub mod handler;
pub mod merge;
pub mod model;
pub mod oid;
pub mod options;
