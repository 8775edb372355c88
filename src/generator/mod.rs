//! Expression generation.
//!
//! The generator is a request/response boundary around an external
//! text-completion capability. It holds no store handle and its output is
//! always a draft: the pipeline validates every candidate it returns.

mod adapter;
mod completion;
mod prompt;

pub use adapter::{
    GenerationError, GenerationResult, GeneratorAdapter, GeneratorMetering, DEFAULT_MAX_REQUEST_CHARS,
};
pub use completion::{CompletionClient, CompletionError, WorkerCompletionClient};
pub use prompt::build_prompt;
