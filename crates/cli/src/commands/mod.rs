pub mod chat;
pub mod onboard;
pub mod start;
