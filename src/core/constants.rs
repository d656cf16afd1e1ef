//! Shared constants used across the application

/// Instruction sent with every session. Kept out of the transcript; the
/// store only ever holds user and assistant turns.
pub const SYSTEM_PROMPT: &str = "You are a helpful, intelligent, and versatile assistant. \
You can process text, images, and audio. \
Respond concisely but clearly. Use markdown for code. \
Be friendly and conversational.";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Fixed user-facing text appended as an assistant turn when a stream fails.
pub const TRANSPORT_APOLOGY: &str =
    "I'm having trouble connecting right now. Please try again later.";

/// Maximum length of the quoted-text snippet captured for replies.
pub const REPLY_SNIPPET_MAX: usize = 80;
