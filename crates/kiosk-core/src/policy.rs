use anyhow::Result;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_UPDATE_SCHEDULE: &str = "0 3 * * *";
pub const DEFAULT_MAX_BACKUPS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatePolicy {
    pub enabled: bool,
    pub branch: String,
    pub check_on_boot: bool,
    pub auto_pull: bool,
    pub backup_before_update: bool,
    pub max_backups: u32,
    pub update_schedule: String,
    #[serde(deserialize_with = "deserialize_lenient_timestamp")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "deserialize_lenient_timestamp")]
    pub last_update: Option<DateTime<Utc>>,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            branch: DEFAULT_BRANCH.to_string(),
            check_on_boot: true,
            auto_pull: false,
            backup_before_update: true,
            max_backups: DEFAULT_MAX_BACKUPS,
            update_schedule: DEFAULT_UPDATE_SCHEDULE.to_string(),
            last_check: None,
            last_update: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_on_boot: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_pull: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_before_update: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backups: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_schedule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

impl PolicyPatch {
    pub fn last_check(at: DateTime<Utc>) -> Self {
        Self {
            last_check: Some(at),
            ..Self::default()
        }
    }

    pub fn last_update(at: DateTime<Utc>) -> Self {
        Self {
            last_update: Some(at),
            ..Self::default()
        }
    }

    pub fn branch(branch: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            ..Self::default()
        }
    }

    pub fn update_schedule(schedule: impl Into<String>) -> Self {
        Self {
            update_schedule: Some(schedule.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply_to(&self, policy: &mut UpdatePolicy) {
        if let Some(enabled) = self.enabled {
            policy.enabled = enabled;
        }
        if let Some(branch) = &self.branch {
            policy.branch = branch.clone();
        }
        if let Some(check_on_boot) = self.check_on_boot {
            policy.check_on_boot = check_on_boot;
        }
        if let Some(auto_pull) = self.auto_pull {
            policy.auto_pull = auto_pull;
        }
        if let Some(backup_before_update) = self.backup_before_update {
            policy.backup_before_update = backup_before_update;
        }
        if let Some(max_backups) = self.max_backups {
            policy.max_backups = max_backups;
        }
        if let Some(update_schedule) = &self.update_schedule {
            policy.update_schedule = update_schedule.clone();
        }
        if let Some(last_check) = self.last_check {
            policy.last_check = Some(last_check);
        }
        if let Some(last_update) = self.last_update {
            policy.last_update = Some(last_update);
        }
    }
}

pub trait PolicyStore: Send + Sync {
    fn load_policy(&self) -> Result<UpdatePolicy>;

    fn update_policy(&self, patch: &PolicyPatch) -> Result<UpdatePolicy>;
}

// Older device files carry naive local timestamps ("2024-05-01T03:00:00.123456").
fn deserialize_lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_lenient_timestamp))
}

pub fn parse_lenient_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}
