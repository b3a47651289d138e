pub mod chat;
pub mod forms;
pub mod health;
