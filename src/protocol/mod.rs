pub mod openai_chat;
pub mod tagged_line;
pub mod upstream;
