//! Unix-millisecond conversions for task timestamps.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serializer};

pub fn to_unix_millis(value: SystemTime) -> Option<i64> {
    let duration = value.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(duration.as_millis()).ok()
}

pub fn from_unix_millis(value: i64) -> Option<SystemTime> {
    let millis = u64::try_from(value).ok()?;
    UNIX_EPOCH.checked_add(Duration::from_millis(millis))
}

/// Serde adapter: `#[serde(with = "unix_millis")]`.
pub mod unix_millis {
    use super::*;

    pub fn serialize<S: Serializer>(value: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = to_unix_millis(*value)
            .ok_or_else(|| serde::ser::Error::custom("time before unix epoch"))?;
        serializer.serialize_i64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        from_unix_millis(millis).ok_or_else(|| serde::de::Error::custom("negative unix millis"))
    }

    pub mod option {
        use super::super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<SystemTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<SystemTime>, D::Error> {
            match Option::<i64>::deserialize(deserializer)? {
                Some(millis) => from_unix_millis(millis)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom("negative unix millis")),
                None => Ok(None),
            }
        }
    }
}
