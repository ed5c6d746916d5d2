//! 기본 타입.

pub mod asset_class;
pub mod quotation;
pub mod resolution;

pub use asset_class::*;
pub use quotation::*;
pub use resolution::*;
