pub mod allocator;

pub use allocator::{AllocationError, SubnetAllocator, next_subnet};
