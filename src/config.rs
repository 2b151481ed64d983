use teloxide::types::UserId;

use crate::content::sheets::DEFAULT_BASE_URL;

const DEFAULT_DATABASE: &str = "db.sqlite";

/// Settings read from the environment (and `.env`, if present).
///
/// The bot token itself is picked up by `Bot::from_env` from `TELOXIDE_TOKEN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub sheet_id: String,
    pub admin_ids: Vec<UserId>,
    pub database_path: String,
    pub sheets_base_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("ADMIN_IDS contains {0:?}, which is not a user id")]
    BadAdminId(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let sheet_id = present("SHEET_ID").ok_or(ConfigError::Missing("SHEET_ID"))?;
        let admin_ids = match present("ADMIN_IDS") {
            Some(raw) => parse_admin_ids(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            sheet_id: sheet_id.trim().to_string(),
            admin_ids,
            database_path: present("PROGRESS_DB")
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            sheets_base_url: present("SHEETS_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        self.admin_ids.contains(&user)
    }
}

/// Comma separated numeric ids, blanks ignored: `"1, 2,,3"`.
pub fn parse_admin_ids(raw: &str) -> Result<Vec<UserId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse()
                .map(UserId)
                .map_err(|_| ConfigError::BadAdminId(id.to_string()))
        })
        .collect()
}
