pub mod auth;
pub mod events;
pub mod init;
pub mod lifecycle;
pub mod neynar;
pub mod notifications;
pub mod registration;
pub mod scheduler;
pub mod stats;
pub mod webhooks;
