//! Consensus module - forging right, hit transforms, retargeting and block structure

mod block;
mod difficulty;
mod error;
mod forging;
mod hit;

pub use block::*;
pub use difficulty::*;
pub use error::*;
pub use forging::*;
pub use hit::*;
