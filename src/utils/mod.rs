pub mod error;
pub mod merge;
pub mod net;
