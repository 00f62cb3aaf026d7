pub mod compatible;
pub mod factory;
pub mod http_client;
pub mod reliable;
pub mod scrub;
pub mod traits;

pub use compatible::OpenAiCompatibleProvider;
pub use factory::{create_provider, create_provider_chain};
pub use reliable::{FallbackEntry, ReliableProvider};
pub use scrub::{api_error, sanitize_api_error, scrub_secret_patterns};
pub use traits::Provider;
