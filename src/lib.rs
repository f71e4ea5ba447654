//! Charged-current single-pion differential cross sections.

pub mod candidate;
pub mod config;
pub mod cutflow;
pub mod cuts;
pub mod error;
pub mod histogram;
pub mod normalize;
pub mod pipeline;
pub mod selection;
pub mod sideband;
pub mod store;
pub mod toy;
pub mod unfold;
pub mod universe;
pub mod variable;
pub mod xsec;

pub use error::{Error, Result};
