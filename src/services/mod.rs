pub mod extraction;
pub mod matching;
pub mod mismatch;
pub mod notifier;
pub mod pipeline;
pub mod roster_import;
pub mod similarity;
pub mod traits;
pub mod worker;
