//
// Copyright 2025 Tabs Data Inc.
//

//! Sqlx codec macros mapping domain types onto SQLite TEXT columns.
//!
//! JSON-valued columns (field schemas, call payloads, tag lists) round-trip
//! through `serde_json`; enum-valued columns (statuses, trigger kinds) round-trip
//! through their `Display`/`FromStr` forms.

/// Implements `sqlx::Type`/`Encode`/`Decode` for a type stored as a JSON TEXT column.
#[macro_export]
macro_rules! sqlx_json_codec {
    ($type:ty) => {
        impl sqlx::Type<sqlx::Sqlite> for $type {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <String as sqlx::Type<sqlx::Sqlite>>::type_info()
            }
        }

        impl sqlx::Encode<'_, sqlx::Sqlite> for $type {
            fn encode_by_ref(
                &self,
                args: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'_>>,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                let json = serde_json::to_string(self)?;
                args.push(sqlx::sqlite::SqliteArgumentValue::Text(
                    std::borrow::Cow::Owned(json),
                ));
                Ok(sqlx::encode::IsNull::No)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $type {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let json = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(serde_json::from_str(&json)?)
            }
        }
    };
}

/// Implements `sqlx::Type`/`Encode`/`Decode` for a type stored as its string form.
#[macro_export]
macro_rules! sqlx_str_codec {
    ($type:ty) => {
        impl sqlx::Type<sqlx::Sqlite> for $type {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <String as sqlx::Type<sqlx::Sqlite>>::type_info()
            }
        }

        impl sqlx::Encode<'_, sqlx::Sqlite> for $type {
            fn encode_by_ref(
                &self,
                args: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'_>>,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                args.push(sqlx::sqlite::SqliteArgumentValue::Text(
                    std::borrow::Cow::Owned(self.to_string()),
                ));
                Ok(sqlx::encode::IsNull::No)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $type {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let text = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(text.parse::<$type>()?)
            }
        }
    };
}
