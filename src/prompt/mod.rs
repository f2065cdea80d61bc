pub mod codec;
pub mod record;

pub use codec::{label_for, parse_prompt_text, serialize_prompt, SCHEMA};
pub use record::StructuredPrompt;
