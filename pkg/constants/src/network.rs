//! Network-related constants.

/// Default port for the nbhub API server.
pub const DEFAULT_API_PORT: u16 = 8000;

/// Default API server address (HTTP), used by `nbhubctl`.
pub const DEFAULT_API_ADDR: &str = "http://127.0.0.1:8000";

/// First octet of the reserved workspace address range.
pub const RESERVED_FIRST_OCTET: u8 = 172;

/// Lowest second octet of the reserved range. Docker's own default pools stop at 172.32.
pub const RESERVED_SECOND_OCTET: u8 = 33;

/// How many times the allocator re-reads the network list after a pool conflict.
pub const MAX_ALLOCATION_ATTEMPTS: u32 = 3;
