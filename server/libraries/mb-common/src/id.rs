//
// Copyright 2025 Tabs Data Inc.
//

//! Entity identifiers.
//!
//! An [`Id`] is a UUID v7, so ids sort by creation time, with a 26-character
//! base32hex wire form that needs no URL encoding. The wire form is the only
//! representation that leaves the process: JSON, database columns and worker
//! frames all carry the string.

use data_encoding::BASE32HEX_NOPAD;
use mb_error::mb_error;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::error::BoxDynError;
use sqlx::sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, Encode, Sqlite, Type};
use std::fmt::{Debug, Display, Formatter};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Length of the wire form: 16 bytes in base32hex without padding.
const ENCODED_LEN: usize = 26;

/// Wire form of the reserved system principal, the caller of
/// scheduler-originated invocations. It is the nil UUID, not a v7.
pub const SYSTEM_ID: &str = "00000000000000000000000000";

#[mb_error]
pub enum IdError {
    #[error("An id has {ENCODED_LEN} characters, got {0}")]
    BadLength(usize) = 0,
    #[error("Not a base32hex id: {0}")]
    BadEncoding(String) = 1,
}

/// A unique identifier encoding its creation time.
#[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Hash)]
pub struct Id(Uuid);

/// Generates a new unique identifier.
pub fn id() -> Id {
    Id(Uuid::now_v7())
}

/// Returns the reserved system identifier.
pub fn system_id() -> Id {
    Id(Uuid::nil())
}

/// The creation time encoded in the identifier. The system identifier maps to
/// the Unix epoch; ids that are neither v7 nor nil carry no time.
pub fn id_time(id: &Id) -> Option<SystemTime> {
    if id.0.is_nil() {
        return Some(SystemTime::UNIX_EPOCH);
    }
    id.0.get_timestamp().map(|ts| {
        let (secs, nanos) = ts.to_unix();
        SystemTime::UNIX_EPOCH + Duration::new(secs, nanos)
    })
}

impl Id {
    fn parse(s: &str) -> Result<Id, IdError> {
        if s.len() != ENCODED_LEN {
            return Err(IdError::BadLength(s.len()));
        }
        let decoded = BASE32HEX_NOPAD
            .decode(s.as_bytes())
            .map_err(|_| IdError::BadEncoding(s.to_string()))?;
        let bytes: [u8; 16] = decoded
            .try_into()
            .map_err(|_| IdError::BadEncoding(s.to_string()))?;
        Ok(Id(Uuid::from_bytes(bytes)))
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", BASE32HEX_NOPAD.encode(self.0.as_bytes()))
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.to_string()).finish()
    }
}

impl TryFrom<&str> for Id {
    type Error = IdError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Id::parse(s)
    }
}

impl TryFrom<&String> for Id {
    type Error = IdError;

    fn try_from(s: &String) -> Result<Self, Self::Error> {
        Id::parse(s)
    }
}

impl From<Id> for String {
    fn from(id: Id) -> String {
        id.to_string()
    }
}

// ids travel through JSON in their wire form, never as raw bytes
impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Id::parse(&s).map_err(D::Error::custom)
    }
}

// database columns store the wire form; both directions delegate to the
// string codecs
impl Type<Sqlite> for Id {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, Sqlite> for Id {
    fn encode_by_ref(
        &self,
        args: &mut Vec<SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, BoxDynError> {
        <String as Encode<'q, Sqlite>>::encode(self.to_string(), args)
    }
}

impl<'r> Decode<'r, Sqlite> for Id {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as Decode<Sqlite>>::decode(value)?;
        Ok(Id::parse(s)?)
    }
}
