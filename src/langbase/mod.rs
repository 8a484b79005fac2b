//! Langbase Pipes client, used as the default language model provider.

mod client;
mod types;

pub use client::{LangbaseClient, LangbaseModel};
pub use types::*;
