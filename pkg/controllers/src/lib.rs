pub mod reclaimer;

pub use reclaimer::{ReclaimError, ResourceReclaimer, SweepReport};
