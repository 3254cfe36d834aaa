pub mod harness;
pub mod test_utils;

pub const ADMIN: &str = "0x00000000000000000000000000000000000000aa";
pub const LENDER: &str = "0x1111111111111111111111111111111111111111";
pub const OTHER_LENDER: &str = "0x2222222222222222222222222222222222222222";

pub const INITIAL_RATE_BPS: u64 = 500;
