//! The elaboration core of a dependently typed language with cumulative
//! universes, extensible records, and deferred meta-programs.

// Supporting modules
mod env;
pub mod files;
pub mod source;

// Intermediate languages
pub mod core;
pub mod surface;

// Definitions and the elaboration driver
pub mod driver;
pub mod globals;

// Public exports
pub use driver::Driver;
pub use globals::{Globals, GlobalsBuilder, Status};
pub use source::{StringId, StringInterner};
