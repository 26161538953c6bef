pub mod chat_llm;
pub mod db;
pub mod embeddings;
