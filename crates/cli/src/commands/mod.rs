pub mod chat;
pub mod graph;
pub mod onboard;
pub mod status;
pub mod study;
pub mod tools;
