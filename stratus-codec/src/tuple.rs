//! Argument tuples of arity 1 through 20.
//!
//! A tuple is written as a positional array whose header equals its arity.
//! Reading is lenient in both directions: positions missing from the input
//! take the codec's per-position defaults, and positions beyond the arity
//! are skipped. Older and newer peers can therefore add or drop trailing
//! parameters without breaking each other.

use std::fmt;

use ntex_bytes::Bytes;

use stratus_core::CodecError;

use crate::wire::{Element, WireReader, WireWriter};

/// A fixed-arity tuple of [`Element`]s.
pub trait ArgumentTuple: Sized {
    /// Number of positions.
    const ARITY: usize;

    /// Type names of each position.
    fn type_names() -> Vec<&'static str>;

    /// Write every position, in order.
    fn write_elements(&self, writer: &mut WireWriter) -> Result<(), CodecError>;

    /// Read positions, falling back to `defaults` where input is missing,
    /// then skip whatever follows.
    fn read_elements(reader: &mut WireReader<'_>, defaults: &Self) -> Result<Self, CodecError>;
}

/// Tuples whose every position has a natural default.
pub trait DefaultArguments: Sized {
    fn default_arguments() -> Self;
}

/// Encoder/decoder for one tuple type, holding the defaults used for
/// positions absent from the input. Build it once and reuse it.
#[derive(Clone)]
pub struct ArgumentTupleCodec<T> {
    defaults: T,
}

impl<T: ArgumentTuple + DefaultArguments> ArgumentTupleCodec<T> {
    /// Codec whose defaults are each position's `Default` value.
    #[must_use]
    pub fn new() -> Self {
        Self {
            defaults: T::default_arguments(),
        }
    }
}

impl<T: ArgumentTuple + DefaultArguments> Default for ArgumentTupleCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ArgumentTuple> ArgumentTupleCodec<T> {
    /// Codec with caller-supplied defaults.
    #[must_use]
    pub fn with_defaults(defaults: T) -> Self {
        Self { defaults }
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        T::ARITY
    }

    #[must_use]
    pub fn defaults(&self) -> &T {
        &self.defaults
    }

    /// Encode a tuple as a positional array of length `T::ARITY`.
    pub fn encode(&self, value: &T) -> Result<Bytes, CodecError> {
        let mut writer = WireWriter::array(T::ARITY);
        value.write_elements(&mut writer)?;
        Ok(writer.finish())
    }

    /// Decode a positional array of any length.
    pub fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let mut reader = WireReader::new(bytes)?;
        T::read_elements(&mut reader, &self.defaults)
    }
}

impl<T> fmt::Debug for ArgumentTupleCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentTupleCodec")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// Next position, or the default when the input ran out or holds nil.
#[inline]
pub(crate) fn read_or_default<T: Element + Clone>(
    reader: &mut WireReader<'_>,
    default: &T,
) -> Result<T, CodecError> {
    if reader.remaining() == 0 {
        return Ok(default.clone());
    }
    match reader.next_raw()? {
        Some(bytes) => T::decode_element(bytes),
        None => Ok(default.clone()),
    }
}

#[inline]
pub(crate) fn skip_rest(reader: &mut WireReader<'_>) -> Result<(), CodecError> {
    while reader.remaining() > 0 {
        reader.skip()?;
    }
    Ok(())
}

macro_rules! argument_tuple {
    ($arity:expr => $($name:ident : $idx:tt),+) => {
        impl<$($name),+> ArgumentTuple for ($($name,)+)
        where
            $($name: Element + Clone),+
        {
            const ARITY: usize = $arity;

            fn type_names() -> Vec<&'static str> {
                vec![$(std::any::type_name::<$name>()),+]
            }

            fn write_elements(&self, writer: &mut WireWriter) -> Result<(), CodecError> {
                $( writer.element(&self.$idx)?; )+
                Ok(())
            }

            fn read_elements(
                reader: &mut WireReader<'_>,
                defaults: &Self,
            ) -> Result<Self, CodecError> {
                let value = ($( read_or_default(reader, &defaults.$idx)?, )+);
                skip_rest(reader)?;
                Ok(value)
            }
        }

        impl<$($name),+> DefaultArguments for ($($name,)+)
        where
            $($name: Default),+
        {
            fn default_arguments() -> Self {
                ($( <$name as Default>::default(), )+)
            }
        }

        impl<$($name),+> crate::args::MethodArgs for ($($name,)+)
        where
            $($name: Element + Clone + Default + Send + Sync + 'static),+
        {
            const COUNT: usize = $arity;

            fn parameter_types() -> Vec<String> {
                <Self as ArgumentTuple>::type_names().into_iter().map(String::from).collect()
            }

            fn defaults() -> Self {
                <Self as DefaultArguments>::default_arguments()
            }

            fn encode_payload(&self) -> Result<Option<Bytes>, CodecError> {
                let mut writer = WireWriter::array($arity);
                self.write_elements(&mut writer)?;
                Ok(Some(writer.finish()))
            }

            fn decode_payload(payload: Option<&[u8]>, defaults: &Self) -> Result<Self, CodecError> {
                match payload {
                    Some(bytes) if !bytes.is_empty() => {
                        let mut reader = WireReader::new(bytes)?;
                        Self::read_elements(&mut reader, defaults)
                    }
                    _ => Ok(defaults.clone()),
                }
            }
        }
    };
}

// Single-position tuples are argument tuples too, but as method arguments
// they are sent bare (see `args.rs`), so they get no `MethodArgs` impl here.
impl<T1: Element + Clone> ArgumentTuple for (T1,) {
    const ARITY: usize = 1;

    fn type_names() -> Vec<&'static str> {
        vec![std::any::type_name::<T1>()]
    }

    fn write_elements(&self, writer: &mut WireWriter) -> Result<(), CodecError> {
        writer.element(&self.0)?;
        Ok(())
    }

    fn read_elements(reader: &mut WireReader<'_>, defaults: &Self) -> Result<Self, CodecError> {
        let value = (read_or_default(reader, &defaults.0)?,);
        skip_rest(reader)?;
        Ok(value)
    }
}

impl<T1: Default> DefaultArguments for (T1,) {
    fn default_arguments() -> Self {
        (T1::default(),)
    }
}

argument_tuple!(2 => T1: 0, T2: 1);
argument_tuple!(3 => T1: 0, T2: 1, T3: 2);
argument_tuple!(4 => T1: 0, T2: 1, T3: 2, T4: 3);
argument_tuple!(5 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4);
argument_tuple!(6 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5);
argument_tuple!(7 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6);
argument_tuple!(8 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6, T8: 7);
argument_tuple!(9 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6, T8: 7, T9: 8);
argument_tuple!(10 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6, T8: 7, T9: 8, T10: 9);
argument_tuple!(11 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6, T8: 7, T9: 8, T10: 9,
    T11: 10);
argument_tuple!(12 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6, T8: 7, T9: 8, T10: 9,
    T11: 10, T12: 11);
argument_tuple!(13 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6, T8: 7, T9: 8, T10: 9,
    T11: 10, T12: 11, T13: 12);
argument_tuple!(14 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6, T8: 7, T9: 8, T10: 9,
    T11: 10, T12: 11, T13: 12, T14: 13);
argument_tuple!(15 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6, T8: 7, T9: 8, T10: 9,
    T11: 10, T12: 11, T13: 12, T14: 13, T15: 14);
argument_tuple!(16 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6, T8: 7, T9: 8, T10: 9,
    T11: 10, T12: 11, T13: 12, T14: 13, T15: 14, T16: 15);
argument_tuple!(17 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6, T8: 7, T9: 8, T10: 9,
    T11: 10, T12: 11, T13: 12, T14: 13, T15: 14, T16: 15, T17: 16);
argument_tuple!(18 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6, T8: 7, T9: 8, T10: 9,
    T11: 10, T12: 11, T13: 12, T14: 13, T15: 14, T16: 15, T17: 16, T18: 17);
argument_tuple!(19 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6, T8: 7, T9: 8, T10: 9,
    T11: 10, T12: 11, T13: 12, T14: 13, T15: 14, T16: 15, T17: 16, T18: 17, T19: 18);
argument_tuple!(20 => T1: 0, T2: 1, T3: 2, T4: 3, T5: 4, T6: 5, T7: 6, T8: 7, T9: 8, T10: 9,
    T11: 10, T12: 11, T13: 12, T14: 13, T15: 14, T16: 15, T17: 16, T18: 17, T19: 18, T20: 19);
