use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;

/// A Farcaster identity mapped to an internal id.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub fid: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub pfp_url: Option<String>,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Best human-readable handle for notification text.
    pub fn handle(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| format!("fid {}", self.fid))
    }
}

/// Fields written when a profile is created or refreshed from Farcaster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpsertProfile {
    pub fid: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub pfp_url: Option<String>,
    pub bio: Option<String>,
}

/// Compact profile used when embedding users in other responses.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct ProfileSummary {
    pub id: String,
    pub fid: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub pfp_url: Option<String>,
}

impl From<Profile> for ProfileSummary {
    fn from(p: Profile) -> Self {
        Self {
            id: p.id,
            fid: p.fid,
            username: p.username,
            display_name: p.display_name,
            pfp_url: p.pfp_url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum GamingPlatform {
    Steam,
    Xbox,
    Playstation,
    Nintendo,
    Epic,
    Battlenet,
    Riot,
    Discord,
    Other,
}

impl FromStr for GamingPlatform {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steam" => Ok(GamingPlatform::Steam),
            "xbox" => Ok(GamingPlatform::Xbox),
            "playstation" | "psn" => Ok(GamingPlatform::Playstation),
            "nintendo" | "switch" => Ok(GamingPlatform::Nintendo),
            "epic" => Ok(GamingPlatform::Epic),
            "battlenet" => Ok(GamingPlatform::Battlenet),
            "riot" => Ok(GamingPlatform::Riot),
            "discord" => Ok(GamingPlatform::Discord),
            "other" => Ok(GamingPlatform::Other),
            _ => Err(AppError::BadRequest(format!("Unknown platform: {s}"))),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Gamertag {
    pub id: String,
    pub profile_id: String,
    pub platform: GamingPlatform,
    pub gamertag: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}
