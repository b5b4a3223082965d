// Library interface for newsdigest modules
// This allows tests and other binaries to import modules

pub mod dedup;
pub mod delivery;
pub mod digest;
pub mod error;
pub mod filters;
pub mod history;
pub mod llm;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod rating;
pub mod select;
pub mod sources;
