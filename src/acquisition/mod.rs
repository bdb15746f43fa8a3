//! Location acquisition module
//!
//! Sources of position fixes behind the [`LocationSource`] trait.

pub mod source;
pub mod replay;
pub mod manual;
pub mod simulate;

pub use source::{LocationSource, PositionStream};
pub use replay::{load_track, ReplaySource, StdinSource};
pub use manual::{FixedSource, ManualSource};
