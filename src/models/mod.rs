pub mod chat;
pub mod dataset;
pub mod intent;
pub mod prompt;
pub mod request;
pub mod response;
