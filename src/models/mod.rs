pub mod circuit_breaker;
pub mod health;
pub mod message;
pub mod notification;
pub mod preferences;
pub mod response;
pub mod retry;
pub mod status;
pub mod template;
