pub mod classify;
pub mod review;

pub use classify::*;
pub use review::*;
