pub mod backend;
pub mod instruction;
pub mod kernel;
pub mod recording;
