pub mod api;
pub mod broadcast;
pub mod chat;
pub mod cli;
pub mod config;
pub mod llm;
pub mod stream;
