pub mod fs_atomic;
pub mod redact;
