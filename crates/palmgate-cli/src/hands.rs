pub use palmgate_core::hands::*;
