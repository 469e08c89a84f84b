pub mod chat;
pub mod init;
pub mod portfolio;
pub mod routine;
pub mod status;
