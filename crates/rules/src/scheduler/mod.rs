//! Chaos scheduler: picks one eligible group per tick and runs its engine.
//!
//! A group is eligible when it is enabled in the settings document and has no
//! schedule entry created within the last scheduler window. Picking is
//! uniform over the eligible set, so over many ticks every enabled group gets
//! its turn without two groups being disrupted in the same window.

mod core;


pub use self::core::ChaosScheduler;
