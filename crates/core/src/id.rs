//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::DomainError;
use crate::period::Period;

/// Maximum accepted length of a tenant identifier.
pub const MAX_TENANT_ID_LEN: usize = 128;

/// Hex characters of the SHA-256 digest kept in a [`DatasetId`] (64 bits).
pub const DATASET_ID_HEX_LEN: usize = 16;

/// Identifier of a tenant (multi-tenant boundary).
///
/// Tenant ids are issued by the surrounding account system, so they are
/// opaque strings rather than UUIDs. They end up as a storage path segment,
/// which is why the accepted alphabet is narrow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let value = raw.as_ref().trim();
        if value.is_empty() {
            return Err(DomainError::invalid_id("TenantId: empty"));
        }
        if value.len() > MAX_TENANT_ID_LEN {
            return Err(DomainError::invalid_id(format!(
                "TenantId: longer than {MAX_TENANT_ID_LEN} characters"
            )));
        }
        if value == "." || value == ".." {
            return Err(DomainError::invalid_id("TenantId: reserved path segment"));
        }
        if let Some(bad) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(DomainError::invalid_id(format!(
                "TenantId: unsupported character {bad:?}"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TenantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

/// Identifier of one processing attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

/// Identifier of a deduplicated upload.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered), so ids sort by creation time.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s.trim())
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(JobId, "JobId");
impl_uuid_newtype!(UploadId, "UploadId");

/// Deterministic identifier of the dataset for one tenant + period.
///
/// `dataset-` followed by the first [`DATASET_ID_HEX_LEN`] hex characters of
/// `sha256("{tenant}:{platform}:{year}:{month}")`. The same period always maps
/// to the same id; stores additionally enforce uniqueness so that a prefix
/// collision between two periods is detected instead of merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    pub const PREFIX: &'static str = "dataset-";

    pub fn derive(tenant_id: &TenantId, period: &Period) -> Self {
        let seed = format!(
            "{}:{}:{}:{}",
            tenant_id,
            period.platform(),
            period.year(),
            period.month()
        );
        let digest = hex::encode(Sha256::digest(seed.as_bytes()));
        Self(format!("{}{}", Self::PREFIX, &digest[..DATASET_ID_HEX_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DatasetId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| DomainError::invalid_id("DatasetId: missing prefix"))?;
        if hex_part.len() != DATASET_ID_HEX_LEN || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::invalid_id("DatasetId: malformed digest"));
        }
        Ok(Self(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::Platform;

    fn period(year: i32, month: u32) -> Period {
        Period::new(Platform::WechatVideo, year, month).unwrap()
    }

    #[test]
    fn tenant_id_accepts_account_style_ids() {
        let t = TenantId::parse(" test-user_001.a ").unwrap();
        assert_eq!(t.as_str(), "test-user_001.a");
    }

    #[test]
    fn tenant_id_rejects_path_segments() {
        assert!(TenantId::parse("").is_err());
        assert!(TenantId::parse("..").is_err());
        assert!(TenantId::parse("a/b").is_err());
        assert!(TenantId::parse("a\\b").is_err());
        assert!(TenantId::parse("x".repeat(MAX_TENANT_ID_LEN + 1)).is_err());
    }

    #[test]
    fn tenant_id_deserialization_validates() {
        let ok: TenantId = serde_json::from_str("\"t1\"").unwrap();
        assert_eq!(ok.as_str(), "t1");
        assert!(serde_json::from_str::<TenantId>("\"../etc\"").is_err());
    }

    #[test]
    fn dataset_id_is_deterministic_per_period() {
        let t1 = TenantId::parse("t1").unwrap();
        let a = DatasetId::derive(&t1, &period(2025, 10));
        let b = DatasetId::derive(&t1, &period(2025, 10));
        assert_eq!(a, b);
        assert_ne!(a, DatasetId::derive(&t1, &period(2025, 11)));

        let t2 = TenantId::parse("t2").unwrap();
        assert_ne!(a, DatasetId::derive(&t2, &period(2025, 10)));
    }

    #[test]
    fn dataset_id_round_trips_through_from_str() {
        let t1 = TenantId::parse("t1").unwrap();
        let id = DatasetId::derive(&t1, &period(2024, 1));
        assert_eq!(id.as_str().len(), DatasetId::PREFIX.len() + DATASET_ID_HEX_LEN);
        assert_eq!(id.as_str().parse::<DatasetId>().unwrap(), id);
        assert!("dataset-zz".parse::<DatasetId>().is_err());
        assert!("job-0123456789abcdef".parse::<DatasetId>().is_err());
    }

    #[test]
    fn uuid_ids_parse_and_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<UploadId>().is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: the dataset id only depends on tenant + period.
            #[test]
            fn dataset_id_depends_only_on_period(
                tenant in "[a-z0-9][a-z0-9_-]{0,30}",
                year in 2000i32..=2100,
                month in 1u32..=12,
            ) {
                let tenant = TenantId::parse(&tenant).unwrap();
                let p = period(year, month);
                let first = DatasetId::derive(&tenant, &p);
                let second = DatasetId::derive(&tenant.clone(), &p.clone());
                prop_assert_eq!(&first, &second);
                prop_assert!(first.as_str().starts_with(DatasetId::PREFIX));
                prop_assert_eq!(first.as_str().len(), DatasetId::PREFIX.len() + DATASET_ID_HEX_LEN);
            }
        }
    }
}
