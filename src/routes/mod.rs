pub mod admin;
pub mod auth;
pub mod chats;
pub mod events;
pub mod groups;
pub mod health;
pub mod notifications;
pub mod profiles;
pub mod users;
pub mod webhooks;
