pub mod call;
pub mod chat_builder;
pub mod chat_stream;
pub mod completer;
pub mod config;
pub mod conversation;
pub mod message;
pub mod querier;
