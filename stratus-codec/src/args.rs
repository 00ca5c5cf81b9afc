//! Request argument and response value encoding for methods.
//!
//! | Parameters | Request shape      | Payload                         |
//! |------------|--------------------|---------------------------------|
//! | 0          | `None`             | none (empty / nil)              |
//! | 1          | `SingleValue(T)`   | the bare element, no tuple header |
//! | 2..=20     | `ArgumentTuple(N)` | positional array of length N    |
//!
//! Methods declare their parameters as a Rust tuple: `()`, `(T,)`,
//! `(T1, T2)` and so on.

use std::any::{Any, TypeId};

use ntex_bytes::Bytes;

use stratus_core::{CodecError, Nil, RequestShape, ResponseShape};

use crate::wire::Element;

/// Parameter list of a method.
pub trait MethodArgs: Sized + Clone + Send + Sync + 'static {
    /// Number of parameters.
    const COUNT: usize;

    /// Parameter type names, in order.
    fn parameter_types() -> Vec<String>;

    /// Values used for parameters missing from a request.
    fn defaults() -> Self;

    /// Encode as a request payload; `None` when there are no parameters.
    fn encode_payload(&self) -> Result<Option<Bytes>, CodecError>;

    /// Decode a request payload. A missing or empty payload yields `defaults`.
    fn decode_payload(payload: Option<&[u8]>, defaults: &Self) -> Result<Self, CodecError>;

    /// Request shape implied by the parameter count.
    fn request_shape() -> RequestShape {
        match Self::COUNT {
            0 => RequestShape::None,
            1 => RequestShape::SingleValue(
                Self::parameter_types().into_iter().next().unwrap_or_default(),
            ),
            n => RequestShape::ArgumentTuple(n),
        }
    }
}

impl MethodArgs for () {
    const COUNT: usize = 0;

    fn parameter_types() -> Vec<String> {
        Vec::new()
    }

    fn defaults() -> Self {}

    fn encode_payload(&self) -> Result<Option<Bytes>, CodecError> {
        Ok(None)
    }

    fn decode_payload(_payload: Option<&[u8]>, _defaults: &Self) -> Result<Self, CodecError> {
        Ok(())
    }
}

impl<T> MethodArgs for (T,)
where
    T: Element + Clone + Default + Send + Sync + 'static,
{
    const COUNT: usize = 1;

    fn parameter_types() -> Vec<String> {
        vec![std::any::type_name::<T>().to_string()]
    }

    fn defaults() -> Self {
        (T::default(),)
    }

    fn encode_payload(&self) -> Result<Option<Bytes>, CodecError> {
        let bytes = self.0.encode_element()?;
        Ok(Some(Bytes::copy_from_slice(&bytes)))
    }

    fn decode_payload(payload: Option<&[u8]>, defaults: &Self) -> Result<Self, CodecError> {
        match payload {
            Some(bytes) if !bytes.is_empty() => Ok((T::decode_element(bytes)?,)),
            _ => Ok(defaults.clone()),
        }
    }
}

/// Whether `R` is the [`Nil`] sentinel.
#[inline]
#[must_use]
pub fn is_nil<R: 'static>() -> bool {
    TypeId::of::<R>() == TypeId::of::<Nil>()
}

/// Response shape of a method returning `R`.
#[must_use]
pub fn response_shape<R: 'static>() -> ResponseShape {
    if is_nil::<R>() {
        ResponseShape::None
    } else {
        ResponseShape::SingleValue(std::any::type_name::<R>().to_string())
    }
}

/// Encode a response value. [`Nil`] encodes to no payload.
pub fn encode_response<R: Element + 'static>(value: &R) -> Result<Option<Bytes>, CodecError> {
    if is_nil::<R>() {
        return Ok(None);
    }
    let bytes = value.encode_element()?;
    Ok(Some(Bytes::copy_from_slice(&bytes)))
}

/// Decode a response value. A missing payload is only valid for [`Nil`].
pub fn decode_response<R: Element + 'static>(payload: Option<&[u8]>) -> Result<R, CodecError> {
    match payload {
        Some(bytes) if !(bytes.is_empty() && is_nil::<R>()) => R::decode_element(bytes),
        _ => (Box::new(Nil) as Box<dyn Any>)
            .downcast::<R>()
            .map(|nil| *nil)
            .map_err(|_| CodecError::UnexpectedNil(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WireReader;

    #[test]
    fn test_request_shapes() {
        assert_eq!(<()>::request_shape(), RequestShape::None);
        assert_eq!(
            <(String,)>::request_shape(),
            RequestShape::SingleValue("alloc::string::String".into())
        );
        assert_eq!(<(u8, u16, u32)>::request_shape(), RequestShape::ArgumentTuple(3));
    }

    #[test]
    fn test_single_value_is_bare() {
        let payload = (42u32,).encode_payload().unwrap().unwrap();
        let bare = 42u32.encode_element().unwrap();
        assert_eq!(&payload[..], &bare[..]);

        let decoded = <(u32,)>::decode_payload(Some(&payload[..]), &(0,)).unwrap();
        assert_eq!(decoded, (42,));
    }

    #[test]
    fn test_tuple_payload_has_header() {
        let payload = (1u8, String::from("a")).encode_payload().unwrap().unwrap();
        assert_eq!(WireReader::new(&payload).unwrap().len(), 2);
        let decoded = <(u8, String)>::decode_payload(Some(&payload[..]), &<(u8, String)>::defaults());
        assert_eq!(decoded.unwrap(), (1, "a".to_string()));
    }

    #[test]
    fn test_missing_payload_uses_defaults() {
        assert_eq!(().encode_payload().unwrap(), None);
        assert_eq!(<(u32,)>::decode_payload(None, &(9,)).unwrap(), (9,));
        assert_eq!(<(u8, u8)>::decode_payload(Some(&[][..]), &(1, 2)).unwrap(), (1, 2));
    }

    #[test]
    fn test_response_encoding() {
        assert_eq!(encode_response(&Nil).unwrap(), None);
        assert_eq!(response_shape::<Nil>(), ResponseShape::None);
        assert_eq!(decode_response::<Nil>(None).unwrap(), Nil);

        let payload = encode_response(&String::from("hi")).unwrap();
        assert!(payload.is_some());
        assert_eq!(decode_response::<String>(payload.as_deref()).unwrap(), "hi");
        assert!(matches!(decode_response::<String>(None), Err(CodecError::UnexpectedNil(0))));
    }
}
