//! Prompt System - Template rendering and instruction-file injection
//!
//! Task, merge and semantic-review prompts are Handlebars templates. Task
//! prompts reach the agent through a marked section of its instruction file.

mod injector;
mod render;
mod templates;

pub use injector::{DEFAULT_INSTRUCTION_FILE, PromptInjector, SECTION_END, SECTION_START};
pub use render::{MERGE_TEMPLATE, PromptRenderer, SEMANTIC_TEMPLATE, TASK_TEMPLATE};
