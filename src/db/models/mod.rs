//! Database models, one file per aggregate.

pub mod chat;
pub mod event;
pub mod group;
pub mod notification;
pub mod participant;
pub mod profile;

pub use self::chat::*;
pub use self::event::*;
pub use self::group::*;
pub use self::notification::*;
pub use self::participant::*;
pub use self::profile::*;
