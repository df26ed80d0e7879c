//! Built-in activities
//!
//! Composite activities drive their children through continuations
//! (`Sequence`, `ForEach`) or behaviors (`Parallel`); leaf activities cover
//! control flow (`Break`, `Cancel`, `Fault`), external events (`Event`) and memory
//! writes (`SetVariable`).

mod control;
mod event;
mod for_each;
mod parallel;
mod sequence;
mod set_variable;

pub use control::{Break, Cancel, Fault};
pub use event::Event;
pub use for_each::ForEach;
pub use parallel::Parallel;
pub use sequence::Sequence;
pub use set_variable::SetVariable;
