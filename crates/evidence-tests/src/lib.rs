pub mod aggregate;
pub mod catalog;
pub mod junit;
pub mod producer;

pub use aggregate::*;
pub use catalog::*;
pub use producer::*;
