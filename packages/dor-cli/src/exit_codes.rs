pub const SUCCESS: i32 = 0;
/// Bad arguments, missing or unusable input, placeholder errors
pub const INPUT_ERROR: i32 = 1;
/// Failure while running or writing output
pub const EXECUTION_ERROR: i32 = 2;
/// Replay finished but some messages or connections failed
pub const PARTIAL_FAILURE: i32 = 3;
