//! LLM backend implementations (OpenAI, Anthropic, Gemini) satisfying
//! `orchestrator-core`'s `Provider` trait.

pub mod anthropic;
pub mod context_windows;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use context_windows::known_context_window;
pub use gemini::GeminiProvider;
pub use openai::OpenAIProvider;
