//! Reporting periods and the enumerations that qualify an upload or a job.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Lowest accepted reporting year.
pub const MIN_YEAR: i32 = 2000;
/// Highest accepted reporting year.
pub const MAX_YEAR: i32 = 2100;

/// Supported e-commerce platforms.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Xiaohongshu,
    Douyin,
    WechatVideo,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Xiaohongshu, Platform::Douyin, Platform::WechatVideo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Xiaohongshu => "xiaohongshu",
            Platform::Douyin => "douyin",
            Platform::WechatVideo => "wechat_video",
        }
    }

    /// Whether settlement files of this platform must be paired with an orders file.
    pub fn requires_orders(&self) -> bool {
        matches!(self, Platform::Xiaohongshu | Platform::Douyin)
    }
}

impl core::fmt::Display for Platform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "unsupported platform {s:?}; expected one of xiaohongshu, douyin, wechat_video"
                ))
            })
    }
}

/// Role a file plays in a processing request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    Settlement,
    Orders,
}

impl FileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::Settlement => "settlement",
            FileRole::Orders => "orders",
        }
    }
}

impl core::fmt::Display for FileRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "settlement" => Ok(FileRole::Settlement),
            "orders" => Ok(FileRole::Orders),
            other => Err(DomainError::validation(format!("unsupported file role {other:?}"))),
        }
    }
}

/// How a job's output relates to earlier jobs of the same period.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMode {
    /// Append to the period's job history.
    #[default]
    Merge,
    /// Supersede earlier job outputs of the period.
    Replace,
}

impl ProcessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessMode::Merge => "merge",
            ProcessMode::Replace => "replace",
        }
    }
}

impl core::fmt::Display for ProcessMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "merge" => Ok(ProcessMode::Merge),
            "replace" => Ok(ProcessMode::Replace),
            other => Err(DomainError::validation(format!(
                "unsupported mode {other:?}; expected merge or replace"
            ))),
        }
    }
}

/// One reporting cycle of a platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    platform: Platform,
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(platform: Platform, year: i32, month: u32) -> DomainResult<Self> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(DomainError::validation(format!(
                "year must be between {MIN_YEAR} and {MAX_YEAR}, got {year}"
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(DomainError::validation(format!(
                "month must be between 1 and 12, got {month}"
            )));
        }
        Ok(Self { platform, year, month })
    }

    /// Build a period from loosely typed request values.
    pub fn parse(platform: &str, year: i64, month: i64) -> DomainResult<Self> {
        let platform: Platform = platform.parse()?;
        let year = i32::try_from(year)
            .map_err(|_| DomainError::validation(format!("year out of range: {year}")))?;
        let month = u32::try_from(month)
            .map_err(|_| DomainError::validation(format!("month must be between 1 and 12, got {month}")))?;
        Self::new(platform, year, month)
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl core::fmt::Display for Period {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{:04}-{:02}", self.platform, self.year, self.month)
    }
}
