pub mod x86_64;

pub use x86_64::backend::{BackendParams, X64Backend};
