pub mod error;
pub mod keys;
pub mod response;
pub mod retry;
pub mod upload;
