//! Palaver is a terminal chat client for Gemini-style streaming LLM APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation state: the ordered transcript, the
//!   session context handle, the streaming reconciliation engine that fills
//!   placeholder turns chunk by chunk, and the audio recording clock.
//! - [`api`] defines the request/response payloads exchanged with the
//!   streaming generate endpoint.
//! - [`cli`] parses arguments and runs the interactive line-oriented loop
//!   that multiplexes user input with stream events.
//! - [`utils`] carries small shared helpers (URL joining, data-URI
//!   encoding, transcript logging).
//!
//! The runtime entrypoint lives in the binary crate (`src/main.rs`) and
//! routes through [`cli::run`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
