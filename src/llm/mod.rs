//! Language model gateway: free-text `chat` and structured `chat_json`.

pub mod gateway;
pub mod json;

pub use gateway::{LanguageModel, ProviderGateway, chat_json};
pub use json::{extract_json, parse_model_json};
