pub mod action;
pub mod embedding;
pub mod records;
pub mod thread;
