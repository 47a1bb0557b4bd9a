#![forbid(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod formats;
pub mod gemini;
pub mod llm;
pub mod logging;
pub mod notify;
pub mod openai;
pub mod pipeline;
pub mod state;
pub mod store;
pub mod translate;
