//! Cross-partition synchronization primitives.

pub mod countdown;
pub mod fixed_max_heap;
