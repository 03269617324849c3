pub mod ai_service;
pub mod gemini; // Google Gemini generateContent client

pub use ai_service::TextGenerator;
pub use gemini::GeminiService;
