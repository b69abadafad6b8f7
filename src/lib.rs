pub mod error;
pub mod netflix;
mod factors;
mod ratings;
mod solver;
mod svd;
mod window;

pub use factors::*;
pub use ratings::*;
pub use solver::*;
pub use svd::*;
pub use window::*;
