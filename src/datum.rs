//! Host values and their wire representations.
//!
//! PostgreSQL identifies every data type by a 32-bit OID and transfers
//! values in either text or binary format. [`TypeRegistry`] maps an OID to
//! the codec pair used to serialize a host [`Value`] into wire bytes and
//! back. Registration happens once at startup; the built-in set covers the
//! common scalar types and consumers may register additional OIDs before
//! the server starts serving.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

/// PostgreSQL object identifier for a data type.
pub type Oid = u32;

/// OIDs of the built-in data types.
///
/// See: <https://github.com/postgres/postgres/blob/master/src/include/catalog/pg_type.dat>
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
}

/// PostgreSQL epoch: 2000-01-01. Binary timestamps count microseconds from
/// this instant, binary dates count days.
const PG_EPOCH_DATE: NaiveDate = match NaiveDate::from_ymd_opt(2000, 1, 1) {
    Some(d) => d,
    None => panic!("invalid date"),
};

fn pg_epoch() -> NaiveDateTime {
    PG_EPOCH_DATE.and_hms_opt(0, 0, 0).expect("valid epoch")
}

/// A host value to be sent to, or received from, a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

impl Value {
    /// Returns true for the SQL NULL value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int2(_) => "int2",
            Value::Int4(_) => "int4",
            Value::Int8(_) => "int8",
            Value::Float4(_) => "float4",
            Value::Float8(_) => "float8",
            Value::Text(_) => "text",
            Value::Bytea(_) => "bytea",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int2(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int4(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int8(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float4(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float8(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytea(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::TimestampTz(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Value encoding/decoding errors.
#[derive(Debug)]
pub enum DatumError {
    /// No codec is registered for the OID.
    UnsupportedType(Oid),
    /// The host value does not belong to the OID's codec domain.
    TypeMismatch { oid: Oid, value: &'static str },
    /// Wire bytes could not be decoded.
    Decode(String),
}

impl std::fmt::Display for DatumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatumError::UnsupportedType(oid) => {
                write!(f, "no codec registered for type oid {}", oid)
            }
            DatumError::TypeMismatch { oid, value } => {
                write!(f, "cannot encode {} value as type oid {}", value, oid)
            }
            DatumError::Decode(msg) => write!(f, "decode error: {}", msg),
        }
    }
}

impl std::error::Error for DatumError {}

/// Text and binary codec pair for one data type.
#[derive(Clone, Copy)]
pub struct TypeCodec {
    pub encode_text: fn(&Value) -> Result<Vec<u8>, DatumError>,
    pub encode_binary: fn(&Value) -> Result<Vec<u8>, DatumError>,
    pub decode_text: fn(&[u8]) -> Result<Value, DatumError>,
    pub decode_binary: fn(&[u8]) -> Result<Value, DatumError>,
}

/// Registry mapping type OIDs to codecs.
///
/// NULLs never reach a codec: the row writer emits the `-1` length sentinel
/// without consulting the registry.
pub struct TypeRegistry {
    codecs: HashMap<Oid, TypeCodec>,
}

impl TypeRegistry {
    /// Creates a registry with all built-in types registered.
    pub fn new() -> Self {
        let mut registry = Self {
            codecs: HashMap::new(),
        };

        registry.register(oid::BOOL, codecs::BOOL);
        registry.register(oid::BYTEA, codecs::BYTEA);
        registry.register(oid::INT2, codecs::INT2);
        registry.register(oid::INT4, codecs::INT4);
        registry.register(oid::INT8, codecs::INT8);
        registry.register(oid::FLOAT4, codecs::FLOAT4);
        registry.register(oid::FLOAT8, codecs::FLOAT8);
        registry.register(oid::TEXT, codecs::TEXT);
        registry.register(oid::VARCHAR, codecs::TEXT);
        registry.register(oid::DATE, codecs::DATE);
        registry.register(oid::TIMESTAMP, codecs::TIMESTAMP);
        registry.register(oid::TIMESTAMPTZ, codecs::TIMESTAMPTZ);

        registry
    }

    /// Registers (or replaces) the codec for an OID.
    pub fn register(&mut self, oid: Oid, codec: TypeCodec) {
        self.codecs.insert(oid, codec);
    }

    /// Returns the codec for an OID, if registered.
    pub fn codec(&self, oid: Oid) -> Option<&TypeCodec> {
        self.codecs.get(&oid)
    }

    /// Encodes a non-NULL host value in the given format.
    pub fn encode(
        &self,
        oid: Oid,
        format: crate::protocol::FormatCode,
        value: &Value,
    ) -> Result<Vec<u8>, DatumError> {
        let codec = self
            .codecs
            .get(&oid)
            .ok_or(DatumError::UnsupportedType(oid))?;
        match format {
            crate::protocol::FormatCode::Text => (codec.encode_text)(value),
            crate::protocol::FormatCode::Binary => (codec.encode_binary)(value),
        }
    }

    /// Decodes wire bytes in the given format back into a host value.
    pub fn decode(
        &self,
        oid: Oid,
        format: crate::protocol::FormatCode,
        bytes: &[u8],
    ) -> Result<Value, DatumError> {
        let codec = self
            .codecs
            .get(&oid)
            .ok_or(DatumError::UnsupportedType(oid))?;
        match format {
            crate::protocol::FormatCode::Text => (codec.decode_text)(bytes),
            crate::protocol::FormatCode::Binary => (codec.decode_binary)(bytes),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

mod codecs {
    use super::*;

    fn text_utf8(bytes: &[u8]) -> Result<&str, DatumError> {
        std::str::from_utf8(bytes).map_err(|e| DatumError::Decode(format!("invalid UTF-8: {}", e)))
    }

    fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], DatumError> {
        bytes
            .try_into()
            .map_err(|_| DatumError::Decode(format!("invalid {} length: {}", what, bytes.len())))
    }

    pub(super) const BOOL: TypeCodec = TypeCodec {
        encode_text: |v| match v {
            Value::Bool(true) => Ok(b"t".to_vec()),
            Value::Bool(false) => Ok(b"f".to_vec()),
            other => Err(DatumError::TypeMismatch {
                oid: oid::BOOL,
                value: other.kind(),
            }),
        },
        encode_binary: |v| match v {
            Value::Bool(b) => Ok(vec![*b as u8]),
            other => Err(DatumError::TypeMismatch {
                oid: oid::BOOL,
                value: other.kind(),
            }),
        },
        decode_text: |bytes| match bytes {
            b"t" | b"true" => Ok(Value::Bool(true)),
            b"f" | b"false" => Ok(Value::Bool(false)),
            other => Err(DatumError::Decode(format!(
                "invalid bool literal: {:?}",
                String::from_utf8_lossy(other)
            ))),
        },
        decode_binary: |bytes| match bytes {
            [0] => Ok(Value::Bool(false)),
            [1] => Ok(Value::Bool(true)),
            _ => Err(DatumError::Decode("invalid bool byte".to_string())),
        },
    };

    pub(super) const BYTEA: TypeCodec = TypeCodec {
        encode_text: |v| match v {
            Value::Bytea(bytes) => {
                let mut out = Vec::with_capacity(2 + bytes.len() * 2);
                out.extend_from_slice(b"\\x");
                for b in bytes {
                    out.extend_from_slice(format!("{:02x}", b).as_bytes());
                }
                Ok(out)
            }
            other => Err(DatumError::TypeMismatch {
                oid: oid::BYTEA,
                value: other.kind(),
            }),
        },
        encode_binary: |v| match v {
            Value::Bytea(bytes) => Ok(bytes.clone()),
            other => Err(DatumError::TypeMismatch {
                oid: oid::BYTEA,
                value: other.kind(),
            }),
        },
        decode_text: |bytes| {
            let s = text_utf8(bytes)?;
            let hex = s
                .strip_prefix("\\x")
                .ok_or_else(|| DatumError::Decode("bytea literal must start with \\x".into()))?;
            if hex.len() % 2 != 0 {
                return Err(DatumError::Decode("odd-length bytea literal".into()));
            }
            let mut out = Vec::with_capacity(hex.len() / 2);
            for chunk in hex.as_bytes().chunks(2) {
                let pair = std::str::from_utf8(chunk)
                    .map_err(|_| DatumError::Decode("invalid bytea literal".into()))?;
                let byte = u8::from_str_radix(pair, 16)
                    .map_err(|_| DatumError::Decode("invalid bytea literal".into()))?;
                out.push(byte);
            }
            Ok(Value::Bytea(out))
        },
        decode_binary: |bytes| Ok(Value::Bytea(bytes.to_vec())),
    };

    macro_rules! int_codec {
        ($name:ident, $oid:expr, $variant:ident, $ty:ty, $width:expr) => {
            pub(super) const $name: TypeCodec = TypeCodec {
                encode_text: |v| match v {
                    Value::$variant(n) => Ok(n.to_string().into_bytes()),
                    other => Err(DatumError::TypeMismatch {
                        oid: $oid,
                        value: other.kind(),
                    }),
                },
                encode_binary: |v| match v {
                    Value::$variant(n) => Ok(n.to_be_bytes().to_vec()),
                    other => Err(DatumError::TypeMismatch {
                        oid: $oid,
                        value: other.kind(),
                    }),
                },
                decode_text: |bytes| {
                    let s = text_utf8(bytes)?;
                    s.parse::<$ty>()
                        .map(Value::$variant)
                        .map_err(|e| DatumError::Decode(format!("invalid integer: {}", e)))
                },
                decode_binary: |bytes| {
                    let arr = fixed::<{ $width }>(bytes, stringify!($variant))?;
                    Ok(Value::$variant(<$ty>::from_be_bytes(arr)))
                },
            };
        };
    }

    int_codec!(INT2, oid::INT2, Int2, i16, 2);
    int_codec!(INT4, oid::INT4, Int4, i32, 4);
    int_codec!(INT8, oid::INT8, Int8, i64, 8);

    macro_rules! float_codec {
        ($name:ident, $oid:expr, $variant:ident, $ty:ty, $width:expr) => {
            pub(super) const $name: TypeCodec = TypeCodec {
                encode_text: |v| match v {
                    Value::$variant(n) => Ok(n.to_string().into_bytes()),
                    other => Err(DatumError::TypeMismatch {
                        oid: $oid,
                        value: other.kind(),
                    }),
                },
                encode_binary: |v| match v {
                    Value::$variant(n) => Ok(n.to_be_bytes().to_vec()),
                    other => Err(DatumError::TypeMismatch {
                        oid: $oid,
                        value: other.kind(),
                    }),
                },
                decode_text: |bytes| {
                    let s = text_utf8(bytes)?;
                    s.parse::<$ty>()
                        .map(Value::$variant)
                        .map_err(|e| DatumError::Decode(format!("invalid float: {}", e)))
                },
                decode_binary: |bytes| {
                    let arr = fixed::<{ $width }>(bytes, stringify!($variant))?;
                    Ok(Value::$variant(<$ty>::from_be_bytes(arr)))
                },
            };
        };
    }

    float_codec!(FLOAT4, oid::FLOAT4, Float4, f32, 4);
    float_codec!(FLOAT8, oid::FLOAT8, Float8, f64, 8);

    pub(super) const TEXT: TypeCodec = TypeCodec {
        encode_text: encode_text_value,
        encode_binary: encode_text_value,
        decode_text: decode_text_value,
        decode_binary: decode_text_value,
    };

    fn encode_text_value(v: &Value) -> Result<Vec<u8>, DatumError> {
        match v {
            Value::Text(s) => Ok(s.clone().into_bytes()),
            other => Err(DatumError::TypeMismatch {
                oid: oid::TEXT,
                value: other.kind(),
            }),
        }
    }

    fn decode_text_value(bytes: &[u8]) -> Result<Value, DatumError> {
        Ok(Value::Text(text_utf8(bytes)?.to_string()))
    }

    pub(super) const DATE: TypeCodec = TypeCodec {
        encode_text: |v| match v {
            Value::Date(d) => Ok(d.format("%Y-%m-%d").to_string().into_bytes()),
            other => Err(DatumError::TypeMismatch {
                oid: oid::DATE,
                value: other.kind(),
            }),
        },
        encode_binary: |v| match v {
            Value::Date(d) => {
                let pg_days = d.signed_duration_since(PG_EPOCH_DATE).num_days() as i32;
                Ok(pg_days.to_be_bytes().to_vec())
            }
            other => Err(DatumError::TypeMismatch {
                oid: oid::DATE,
                value: other.kind(),
            }),
        },
        decode_text: |bytes| {
            let s = text_utf8(bytes)?;
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| DatumError::Decode(format!("invalid date: {}", e)))
        },
        decode_binary: |bytes| {
            let arr = fixed::<4>(bytes, "date")?;
            let pg_days = i32::from_be_bytes(arr);
            PG_EPOCH_DATE
                .checked_add_signed(Duration::days(pg_days as i64))
                .map(Value::Date)
                .ok_or_else(|| DatumError::Decode("date overflow".into()))
        },
    };

    pub(super) const TIMESTAMP: TypeCodec = TypeCodec {
        encode_text: |v| match v {
            Value::Timestamp(ts) => Ok(ts
                .format("%Y-%m-%d %H:%M:%S%.f")
                .to_string()
                .into_bytes()),
            other => Err(DatumError::TypeMismatch {
                oid: oid::TIMESTAMP,
                value: other.kind(),
            }),
        },
        encode_binary: |v| match v {
            Value::Timestamp(ts) => {
                let usecs = ts
                    .signed_duration_since(pg_epoch())
                    .num_microseconds()
                    .unwrap_or(i64::MAX);
                Ok(usecs.to_be_bytes().to_vec())
            }
            other => Err(DatumError::TypeMismatch {
                oid: oid::TIMESTAMP,
                value: other.kind(),
            }),
        },
        decode_text: |bytes| {
            let s = text_utf8(bytes)?;
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
                .map(Value::Timestamp)
                .map_err(|e| DatumError::Decode(format!("invalid timestamp: {}", e)))
        },
        decode_binary: |bytes| {
            let arr = fixed::<8>(bytes, "timestamp")?;
            let usecs = i64::from_be_bytes(arr);
            pg_epoch()
                .checked_add_signed(Duration::microseconds(usecs))
                .map(Value::Timestamp)
                .ok_or_else(|| DatumError::Decode("timestamp overflow".into()))
        },
    };

    pub(super) const TIMESTAMPTZ: TypeCodec = TypeCodec {
        encode_text: |v| match v {
            Value::TimestampTz(ts) => Ok(ts
                .format("%Y-%m-%d %H:%M:%S%.f+00")
                .to_string()
                .into_bytes()),
            other => Err(DatumError::TypeMismatch {
                oid: oid::TIMESTAMPTZ,
                value: other.kind(),
            }),
        },
        encode_binary: |v| match v {
            Value::TimestampTz(ts) => {
                let usecs = ts
                    .signed_duration_since(pg_epoch().and_utc())
                    .num_microseconds()
                    .unwrap_or(i64::MAX);
                Ok(usecs.to_be_bytes().to_vec())
            }
            other => Err(DatumError::TypeMismatch {
                oid: oid::TIMESTAMPTZ,
                value: other.kind(),
            }),
        },
        decode_text: |bytes| {
            let s = text_utf8(bytes)?;
            DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z")
                .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%#z"))
                .map(|dt| Value::TimestampTz(dt.with_timezone(&Utc)))
                .map_err(|e| DatumError::Decode(format!("invalid timestamptz: {}", e)))
        },
        decode_binary: |bytes| {
            let arr = fixed::<8>(bytes, "timestamptz")?;
            let usecs = i64::from_be_bytes(arr);
            pg_epoch()
                .and_utc()
                .checked_add_signed(Duration::microseconds(usecs))
                .map(Value::TimestampTz)
                .ok_or_else(|| DatumError::Decode("timestamptz overflow".into()))
        },
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FormatCode;

    fn roundtrip(oid: Oid, value: Value) {
        let registry = TypeRegistry::new();
        for format in [FormatCode::Text, FormatCode::Binary] {
            let encoded = registry.encode(oid, format, &value).unwrap();
            let decoded = registry.decode(oid, format, &encoded).unwrap();
            assert_eq!(decoded, value, "oid {} format {:?}", oid, format);
        }
    }

    #[test]
    fn test_bool_text_form() {
        let registry = TypeRegistry::new();
        assert_eq!(
            registry
                .encode(oid::BOOL, FormatCode::Text, &Value::Bool(true))
                .unwrap(),
            b"t"
        );
        assert_eq!(
            registry
                .encode(oid::BOOL, FormatCode::Text, &Value::Bool(false))
                .unwrap(),
            b"f"
        );
    }

    #[test]
    fn test_bool_binary_form() {
        let registry = TypeRegistry::new();
        assert_eq!(
            registry
                .encode(oid::BOOL, FormatCode::Binary, &Value::Bool(true))
                .unwrap(),
            vec![1]
        );
        assert_eq!(
            registry
                .encode(oid::BOOL, FormatCode::Binary, &Value::Bool(false))
                .unwrap(),
            vec![0]
        );
    }

    #[test]
    fn test_int_binary_is_network_order() {
        let registry = TypeRegistry::new();
        assert_eq!(
            registry
                .encode(oid::INT4, FormatCode::Binary, &Value::Int4(0x01020304))
                .unwrap(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(
            registry
                .encode(oid::INT2, FormatCode::Binary, &Value::Int2(-1))
                .unwrap(),
            vec![0xff, 0xff]
        );
    }

    #[test]
    fn test_timestamp_binary_is_pg_epoch_micros() {
        let registry = TypeRegistry::new();
        // One second past the PostgreSQL epoch.
        let ts = NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        let encoded = registry
            .encode(oid::TIMESTAMP, FormatCode::Binary, &Value::Timestamp(ts))
            .unwrap();
        assert_eq!(encoded, 1_000_000i64.to_be_bytes());
    }

    #[test]
    fn test_roundtrips() {
        roundtrip(oid::BOOL, Value::Bool(true));
        roundtrip(oid::INT2, Value::Int2(-32768));
        roundtrip(oid::INT4, Value::Int4(28));
        roundtrip(oid::INT8, Value::Int8(i64::MIN));
        roundtrip(oid::FLOAT4, Value::Float4(1.5));
        roundtrip(oid::FLOAT8, Value::Float8(-0.125));
        roundtrip(oid::TEXT, Value::Text("John".to_string()));
        roundtrip(oid::BYTEA, Value::Bytea(vec![0, 1, 0xfe, 0xff]));
        roundtrip(
            oid::DATE,
            Value::Date(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap()),
        );
        roundtrip(
            oid::TIMESTAMP,
            Value::Timestamp(
                NaiveDate::from_ymd_opt(2024, 1, 15)
                    .unwrap()
                    .and_hms_micro_opt(10, 30, 45, 123456)
                    .unwrap(),
            ),
        );
        roundtrip(
            oid::TIMESTAMPTZ,
            Value::TimestampTz(
                NaiveDate::from_ymd_opt(2024, 1, 15)
                    .unwrap()
                    .and_hms_micro_opt(10, 30, 45, 123456)
                    .unwrap()
                    .and_utc(),
            ),
        );
    }

    #[test]
    fn test_unsupported_type() {
        let registry = TypeRegistry::new();
        let result = registry.encode(9999, FormatCode::Text, &Value::Int4(1));
        assert!(matches!(result, Err(DatumError::UnsupportedType(9999))));
    }

    #[test]
    fn test_type_mismatch() {
        let registry = TypeRegistry::new();
        let result = registry.encode(oid::BOOL, FormatCode::Text, &Value::Int4(1));
        assert!(matches!(result, Err(DatumError::TypeMismatch { .. })));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = TypeRegistry::new();
        // A json type that serializes text values verbatim.
        registry.register(
            114,
            TypeCodec {
                encode_text: |v| match v {
                    Value::Text(s) => Ok(s.clone().into_bytes()),
                    other => Err(DatumError::TypeMismatch {
                        oid: 114,
                        value: other.kind(),
                    }),
                },
                encode_binary: |v| match v {
                    Value::Text(s) => Ok(s.clone().into_bytes()),
                    other => Err(DatumError::TypeMismatch {
                        oid: 114,
                        value: other.kind(),
                    }),
                },
                decode_text: |bytes| {
                    Ok(Value::Text(String::from_utf8_lossy(bytes).into_owned()))
                },
                decode_binary: |bytes| {
                    Ok(Value::Text(String::from_utf8_lossy(bytes).into_owned()))
                },
            },
        );

        let encoded = registry
            .encode(114, FormatCode::Text, &Value::Text("{}".to_string()))
            .unwrap();
        assert_eq!(encoded, b"{}");
    }

    #[test]
    fn test_value_from_impls() {
        assert_eq!(Value::from(28), Value::Int4(28));
        assert_eq!(Value::from("John"), Value::Text("John".to_string()));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(true)), Value::Bool(true));
    }
}
