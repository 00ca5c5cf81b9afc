//! Positional wire format.
//!
//! ```text
//! array   = count:u32le element*count
//! element = len:u32le bytes[len]      (len = 0xFFFF_FFFF marks nil, no bytes)
//! ```
//!
//! Elements are opaque byte strings. Values are stored as rkyv archives
//! (see [`Element`]); integers used by the hub envelope are stored as
//! fixed-width little-endian elements.

use ntex_bytes::{BufMut, Bytes, BytesMut};
use rkyv::api::high::{HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::de::Pool;
use rkyv::rancor::{Error as RkyvError, Strategy};
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use stratus_core::CodecError;

/// Length marker of a nil element.
pub const NIL_LENGTH: u32 = u32::MAX;

const HEADER_LEN: usize = 4;

/// A value that can occupy one element of a positional array.
///
/// Implemented for every type rkyv can serialize and validate. Decoding
/// copies the element into an aligned buffer first, since elements sit at
/// arbitrary offsets inside a message.
pub trait Element: Sized {
    /// Serialize into element bytes.
    fn encode_element(&self) -> Result<AlignedVec, CodecError>;

    /// Validate and deserialize element bytes.
    fn decode_element(bytes: &[u8]) -> Result<Self, CodecError>;
}

impl<T> Element for T
where
    T: Archive + for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, RkyvError>>,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, RkyvError>>
        + Deserialize<T, Strategy<Pool, RkyvError>>,
{
    #[inline]
    fn encode_element(&self) -> Result<AlignedVec, CodecError> {
        rkyv::to_bytes::<RkyvError>(self).map_err(|e| CodecError::Serialization(e.to_string()))
    }

    #[inline]
    fn decode_element(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<T, RkyvError>(&aligned)
            .map_err(|e| CodecError::Deserialization(e.to_string()))
    }
}

/// Builds one positional array.
#[derive(Debug)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Start an array of `count` elements.
    #[must_use]
    pub fn array(count: usize) -> Self {
        Self::with_capacity(count, 64)
    }

    /// Start an array of `count` elements with a capacity hint in bytes.
    #[must_use]
    pub fn with_capacity(count: usize, capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + capacity);
        buf.put_u32_le(count as u32);
        Self { buf }
    }

    /// Append an element holding `bytes`.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.reserve(HEADER_LEN + bytes.len());
        self.buf.put_u32_le(bytes.len() as u32);
        self.buf.put_slice(bytes);
        self
    }

    /// Append a nil element.
    pub fn nil(&mut self) -> &mut Self {
        self.buf.put_u32_le(NIL_LENGTH);
        self
    }

    /// Append `bytes`, or nil for `None`.
    pub fn optional(&mut self, bytes: Option<&[u8]>) -> &mut Self {
        match bytes {
            Some(bytes) => self.raw(bytes),
            None => self.nil(),
        }
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.raw(&value.to_le_bytes())
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.raw(&value.to_le_bytes())
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.raw(value.as_bytes())
    }

    /// Append a serialized value.
    pub fn element<T: Element>(&mut self, value: &T) -> Result<&mut Self, CodecError> {
        let bytes = value.encode_element()?;
        Ok(self.raw(&bytes))
    }

    /// Finish the array.
    #[must_use]
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Reads one positional array, element by element.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    input: &'a [u8],
    pos: usize,
    count: usize,
    index: usize,
}

impl<'a> WireReader<'a> {
    /// Read the array header.
    pub fn new(input: &'a [u8]) -> Result<Self, CodecError> {
        let mut reader = Self {
            input,
            pos: 0,
            count: 0,
            index: 0,
        };
        reader.count = reader.take_u32()? as usize;
        Ok(reader)
    }

    /// Number of elements declared by the header.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Elements not read yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.count - self.index
    }

    /// Position of the next element.
    #[must_use]
    pub fn position(&self) -> usize {
        self.index
    }

    /// Next element; `None` if it is nil.
    pub fn next_raw(&mut self) -> Result<Option<&'a [u8]>, CodecError> {
        if self.index >= self.count {
            return Err(CodecError::InvalidMessage(format!(
                "read past the end of a {}-element array",
                self.count
            )));
        }
        let len = self.take_u32()?;
        self.index += 1;
        if len == NIL_LENGTH {
            return Ok(None);
        }
        self.take(len as usize).map(Some)
    }

    /// Next element, which must not be nil.
    pub fn required(&mut self) -> Result<&'a [u8], CodecError> {
        let position = self.index;
        self.next_raw()?.ok_or(CodecError::UnexpectedNil(position))
    }

    /// Skip the next element without interpreting it.
    pub fn skip(&mut self) -> Result<(), CodecError> {
        self.next_raw().map(|_| ())
    }

    pub fn i32(&mut self) -> Result<i32, CodecError> {
        let bytes = self.required()?;
        let bytes: [u8; 4] = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidMessage(format!("expected 4-byte integer, got {} bytes", bytes.len())))?;
        Ok(i32::from_le_bytes(bytes))
    }

    pub fn u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.required()?;
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidMessage(format!("expected 8-byte integer, got {} bytes", bytes.len())))?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Next element as UTF-8 text; `None` if nil.
    pub fn string(&mut self) -> Result<Option<String>, CodecError> {
        match self.next_raw()? {
            Some(bytes) => std::str::from_utf8(bytes)
                .map(|s| Some(s.to_string()))
                .map_err(|e| CodecError::InvalidMessage(e.to_string())),
            None => Ok(None),
        }
    }

    /// Next element as an owned buffer; `None` if nil.
    pub fn bytes(&mut self) -> Result<Option<Bytes>, CodecError> {
        Ok(self.next_raw()?.map(Bytes::copy_from_slice))
    }

    /// Deserialize the next element.
    pub fn element<T: Element>(&mut self) -> Result<T, CodecError> {
        T::decode_element(self.required()?)
    }

    fn take_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(HEADER_LEN)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.input.len() - self.pos;
        if remaining < len {
            return Err(CodecError::Truncated {
                needed: len,
                remaining,
            });
        }
        let slice = &self.input[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}
