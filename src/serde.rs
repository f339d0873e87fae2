//! Value encoding. A [`Serde`] binds in-memory values to wire payloads
//! plus the 16-bit flags tag memcached persists with each item and hands
//! back verbatim on fetch.

use std::marker::PhantomData;

use ::serde::de::DeserializeOwned;
use ::serde::Serialize;

use crate::error::Error;

/// Flags bit for values produced by the native object encoder (bincode).
pub const FLAG_OBJECT: u16 = 1 << 0;
/// Flags bit for integer values, stored as ASCII decimal.
pub const FLAG_INTEGER: u16 = 1 << 1;
/// Legacy integer bit written by older clients; read, never written.
pub const FLAG_LONG: u16 = 1 << 2;
/// Flags bit for zlib-compressed payloads.
pub const FLAG_COMPRESSED: u16 = 1 << 3;
/// Flags bit for UTF-8 text values.
pub const FLAG_TEXT: u16 = 1 << 4;

/// The value-encoding capability. Implementations are provided for
/// [`NoSerde`] (raw bytes), [`DefaultSerde`] (flags-dispatched [`Value`]s)
/// and [`BincodeSerde`] (one concrete type through bincode); custom
/// encodings implement this trait and pass into the client constructors.
pub trait Serde: Clone + Send + Sync {
    /// The in-memory value type this serde produces and consumes.
    type Value;

    /// Encode a value, returning the payload and the flags to store.
    fn serialize(&self, key: &[u8], value: &Self::Value) -> Result<(Vec<u8>, u16), Error>;

    /// Rebuild a value from the payload and the stored flags.
    fn deserialize(&self, key: &[u8], data: Vec<u8>, flags: u16) -> Result<Self::Value, Error>;
}

/// A serde that passes raw bytes through untouched, with zero flags.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSerde;

impl Serde for NoSerde {
    type Value = Vec<u8>;

    fn serialize(&self, _key: &[u8], value: &Vec<u8>) -> Result<(Vec<u8>, u16), Error> {
        Ok((value.clone(), 0))
    }

    fn deserialize(&self, _key: &[u8], data: Vec<u8>, _flags: u16) -> Result<Vec<u8>, Error> {
        Ok(data)
    }
}

/// Values understood by [`DefaultSerde`].
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Raw bytes, stored with zero flags.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// A signed integer, stored as ASCII decimal.
    Int(i64),
    /// An opaque bincode-encoded blob; see [`Value::encode`].
    Object(Vec<u8>),
}

impl Value {
    /// Encode any serializable type into an opaque object value.
    pub fn encode<V: Serialize + ?Sized>(value: &V) -> Result<Value, Error> {
        Ok(Value::Object(bincode::serialize(value)?))
    }

    /// Decode an object value back into a concrete type.
    pub fn decode<V: DeserializeOwned>(&self) -> Result<V, Error> {
        match self {
            Value::Object(data) => Ok(bincode::deserialize(data)?),
            _ => Err(Error::IllegalInput("not an object value".to_string())),
        }
    }
}

/// The stock serde: raw bytes, UTF-8 text, decimal integers and opaque
/// bincode objects, tagged with the corresponding flags bits. Unknown
/// flag combinations deserialize as raw bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSerde;

impl Serde for DefaultSerde {
    type Value = Value;

    fn serialize(&self, _key: &[u8], value: &Value) -> Result<(Vec<u8>, u16), Error> {
        Ok(match value {
            Value::Bytes(data) => (data.clone(), 0),
            Value::Text(text) => (text.clone().into_bytes(), FLAG_TEXT),
            Value::Int(n) => (n.to_string().into_bytes(), FLAG_INTEGER),
            Value::Object(data) => (data.clone(), FLAG_OBJECT),
        })
    }

    fn deserialize(&self, _key: &[u8], data: Vec<u8>, flags: u16) -> Result<Value, Error> {
        if flags == 0 {
            return Ok(Value::Bytes(data));
        }
        if flags & FLAG_TEXT != 0 {
            let text = String::from_utf8(data)
                .map_err(|err| Error::IllegalInput(format!("text value is not UTF-8: {}", err)))?;
            return Ok(Value::Text(text));
        }
        if flags & (FLAG_INTEGER | FLAG_LONG) != 0 {
            let n = std::str::from_utf8(&data)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    Error::IllegalInput("integer value is not ASCII decimal".to_string())
                })?;
            return Ok(Value::Int(n));
        }
        if flags & FLAG_OBJECT != 0 {
            return Ok(Value::Object(data));
        }
        Ok(Value::Bytes(data))
    }
}

/// A fully typed serde that runs every value through bincode, for
/// callers storing one concrete type.
pub struct BincodeSerde<V>(PhantomData<fn() -> V>);

impl<V> BincodeSerde<V> {
    pub fn new() -> Self {
        BincodeSerde(PhantomData)
    }
}

impl<V> Default for BincodeSerde<V> {
    fn default() -> Self {
        BincodeSerde::new()
    }
}

impl<V> Clone for BincodeSerde<V> {
    fn clone(&self) -> Self {
        BincodeSerde(PhantomData)
    }
}

impl<V> Copy for BincodeSerde<V> {}

impl<V: Serialize + DeserializeOwned> Serde for BincodeSerde<V> {
    type Value = V;

    fn serialize(&self, _key: &[u8], value: &V) -> Result<(Vec<u8>, u16), Error> {
        Ok((bincode::serialize(value)?, FLAG_OBJECT))
    }

    fn deserialize(&self, _key: &[u8], data: Vec<u8>, _flags: u16) -> Result<V, Error> {
        Ok(bincode::deserialize(&data)?)
    }
}

/// Adapts a pair of free functions to the [`Serde`] capability, for
/// callers migrating from split serializer/deserializer callbacks.
pub struct FnSerde<V> {
    serialize: fn(&[u8], &V) -> Result<(Vec<u8>, u16), Error>,
    deserialize: fn(&[u8], Vec<u8>, u16) -> Result<V, Error>,
}

impl<V> FnSerde<V> {
    pub fn new(
        serialize: fn(&[u8], &V) -> Result<(Vec<u8>, u16), Error>,
        deserialize: fn(&[u8], Vec<u8>, u16) -> Result<V, Error>,
    ) -> Self {
        FnSerde {
            serialize,
            deserialize,
        }
    }
}

impl<V> Clone for FnSerde<V> {
    fn clone(&self) -> Self {
        FnSerde {
            serialize: self.serialize,
            deserialize: self.deserialize,
        }
    }
}

impl<V> Serde for FnSerde<V> {
    type Value = V;

    fn serialize(&self, key: &[u8], value: &V) -> Result<(Vec<u8>, u16), Error> {
        (self.serialize)(key, value)
    }

    fn deserialize(&self, key: &[u8], data: Vec<u8>, flags: u16) -> Result<V, Error> {
        (self.deserialize)(key, data, flags)
    }
}
