pub mod chat;
pub mod chat_stream;
pub mod config;
pub mod constants;
pub mod recording;
pub mod session;
pub mod transcript;
pub mod turn;
