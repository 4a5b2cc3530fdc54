// Conversion: prompt composition, Box AI call, response interpretation and
// mapping assembly, plus export, error analysis and the HTTP handlers.
// All Box calls go through box_client via the DocumentAi trait.

pub mod assembler;
pub mod composer;
pub mod error_analysis;
pub mod export;
pub mod handlers;
pub mod interpreter;
pub mod pipeline;
pub mod prompts;
