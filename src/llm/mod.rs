pub mod gemini;
pub mod media;

pub use gemini::{describe_image, generate_image, ImageGenConfig, ImageGenerationError};
