use flate2::{
    write::{ZlibDecoder, ZlibEncoder},
    Compression,
};
use std::io::Write;

use crate::error::Error;
use crate::serde::{Serde, FLAG_COMPRESSED};

/// The minimum number of bytes before the zlib serde starts compressing
/// payloads. Small values cost more to compress than they save.
pub const DEFAULT_MIN_BYTES: usize = 128;

/// A serde adapter that zlib-compresses the payloads an inner serde
/// produces, tagging them with the compressed flags bit so fetches know
/// to inflate before handing the payload back to the inner serde.
#[derive(Clone, Debug)]
pub struct ZlibSerde<S> {
    inner: S,
    compression: Compression,
    min_bytes: usize,
}

impl<S> ZlibSerde<S> {
    /// Wrap `inner`, compressing payloads of at least `min_bytes` bytes
    /// at the given compression level.
    pub fn new(inner: S, compression: Compression, min_bytes: usize) -> Self {
        ZlibSerde {
            inner,
            compression,
            min_bytes,
        }
    }
}

impl<S: Default> Default for ZlibSerde<S> {
    fn default() -> Self {
        ZlibSerde::new(S::default(), Compression::default(), DEFAULT_MIN_BYTES)
    }
}

impl<S: Serde> Serde for ZlibSerde<S> {
    type Value = S::Value;

    fn serialize(&self, key: &[u8], value: &S::Value) -> Result<(Vec<u8>, u16), Error> {
        let (data, flags) = self.inner.serialize(key, value)?;
        if data.len() < self.min_bytes {
            return Ok((data, flags));
        }

        let mut out = vec![];
        let mut enc = ZlibEncoder::new(&mut out, self.compression);
        enc.write_all(&data)?;
        enc.finish()?;
        Ok((out, flags | FLAG_COMPRESSED))
    }

    fn deserialize(&self, key: &[u8], data: Vec<u8>, flags: u16) -> Result<S::Value, Error> {
        if flags & FLAG_COMPRESSED == 0 {
            // stored before compression was enabled, or below the threshold
            return self.inner.deserialize(key, data, flags);
        }

        let mut out = vec![];
        let mut dec = ZlibDecoder::new(&mut out);
        dec.write_all(&data)?;
        dec.finish()?;
        self.inner.deserialize(key, out, flags & !FLAG_COMPRESSED)
    }
}
