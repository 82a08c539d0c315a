mod document;
mod report;

pub use document::*;
pub use report::*;
