//! Provider adapters - web search and LLM calls with rate limits and retry classes

pub mod llm;
pub mod prompts;
pub mod rate_limit;
pub mod retry;
pub mod search;
pub mod types;

pub use llm::{ChatCompletionsClient, LlmAdapter};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use search::{HttpWebSearch, WebSearch};
pub use types::*;
