pub mod chat;
pub mod event;
pub mod group;
pub mod notification_log;
pub mod notification_preferences;
pub mod notification_token;
pub mod participant;
pub mod profile;

pub use chat::ChatRepository;
pub use event::EventRepository;
pub use group::GroupRepository;
pub use notification_log::NotificationLogRepository;
pub use notification_preferences::NotificationPreferencesRepository;
pub use notification_token::NotificationTokenRepository;
pub use participant::ParticipantRepository;
pub use profile::ProfileRepository;
