//! Method signatures, descriptors and the rules that map one to the other.
//!
//! A [`MethodSignature`] is plain metadata describing a method as it was
//! declared. [`resolve_service_method`] and [`resolve_hub_method`] turn it
//! into a [`MethodDescriptor`] or reject it with
//! [`RegistrationError::InvalidSignature`]. Both are pure and may be called
//! any number of times.

use std::fmt;
use std::sync::Arc;

use crate::error::RegistrationError;

/// Largest number of positional parameters a method may declare.
pub const MAX_ARGUMENTS: usize = 20;

/// Call shape of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Unary,
    ClientStreaming,
    ServerStreaming,
    DuplexStreaming,
}

impl MethodKind {
    /// Whether the client sends a stream of messages.
    #[must_use]
    pub const fn has_request_stream(self) -> bool {
        matches!(self, Self::ClientStreaming | Self::DuplexStreaming)
    }

    /// Whether the server sends a stream of messages.
    #[must_use]
    pub const fn has_response_stream(self) -> bool {
        matches!(self, Self::ServerStreaming | Self::DuplexStreaming)
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How the request payload of a method is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestShape {
    /// No parameters; the payload is empty (nil on the hub wire).
    None,
    /// One parameter, encoded bare.
    SingleValue(String),
    /// `N >= 2` parameters, encoded as a positional array of length `N`.
    ArgumentTuple(usize),
}

/// How the response payload of a method is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseShape {
    /// No value (the `Nil` sentinel).
    None,
    SingleValue(String),
}

/// Result wrapper a method declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnWrapper {
    Unary,
    ClientStreaming,
    ServerStreaming,
    DuplexStreaming,
    /// A plain asynchronous result; only valid for hub methods.
    Task,
    /// Anything else, by name.
    Other(String),
}

/// Value type carried by the return wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Nil,
    Named(String),
}

impl ValueType {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

/// Declared return type of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnType {
    pub wrapper: ReturnWrapper,
    /// Whether the wrapper itself is produced asynchronously.
    pub is_async: bool,
    pub value: ValueType,
}

impl ReturnType {
    #[must_use]
    pub fn new(wrapper: ReturnWrapper, value: ValueType) -> Self {
        Self {
            wrapper,
            is_async: false,
            value,
        }
    }

    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }
}

/// Declared shape of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub name: String,
    /// Parameter type names, in declaration order.
    pub parameters: Vec<String>,
    pub returns: ReturnType,
    pub is_generic: bool,
}

impl MethodSignature {
    #[must_use]
    pub fn new(name: impl Into<String>, returns: ReturnType) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            returns,
            is_generic: false,
        }
    }

    /// Append a parameter type.
    #[must_use]
    pub fn param(mut self, type_name: impl Into<String>) -> Self {
        self.parameters.push(type_name.into());
        self
    }

    /// Replace all parameter types.
    #[must_use]
    pub fn params<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn generic(mut self) -> Self {
        self.is_generic = true;
        self
    }
}

/// Resolved, immutable description of one registered method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub service: Arc<str>,
    pub method: Arc<str>,
    pub signature: MethodSignature,
    pub kind: MethodKind,
    pub request: RequestShape,
    pub response: ResponseShape,
}

impl MethodDescriptor {
    /// `"Service/Method"`, as used in logs and error details.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/{}", self.service, self.method)
    }
}

/// Resolve a service method (unary or one of the streaming kinds).
pub fn resolve_service_method(
    service: &str,
    signature: &MethodSignature,
) -> Result<MethodDescriptor, RegistrationError> {
    let name = signature.name.as_str();
    if signature.is_generic {
        return Err(RegistrationError::invalid(service, name, "generic methods are not supported"));
    }

    let kind = match &signature.returns.wrapper {
        ReturnWrapper::Unary => MethodKind::Unary,
        ReturnWrapper::ClientStreaming => MethodKind::ClientStreaming,
        ReturnWrapper::ServerStreaming => MethodKind::ServerStreaming,
        ReturnWrapper::DuplexStreaming => MethodKind::DuplexStreaming,
        ReturnWrapper::Task => {
            return Err(RegistrationError::invalid(
                service,
                name,
                "a plain async return type is only valid for hub methods",
            ));
        }
        ReturnWrapper::Other(other) => {
            return Err(RegistrationError::invalid(
                service,
                name,
                format!("unsupported return type `{other}`"),
            ));
        }
    };

    if kind.has_request_stream() && !signature.parameters.is_empty() {
        return Err(RegistrationError::invalid(
            service,
            name,
            format!(
                "{kind} does not support method parameters. If you need to send initial parameter, use header instead."
            ),
        ));
    }

    build(service, signature, kind)
}

/// Resolve a hub method. Hub methods return a plain async result and are
/// dispatched like unary calls over the hub's connection.
pub fn resolve_hub_method(
    hub: &str,
    signature: &MethodSignature,
) -> Result<MethodDescriptor, RegistrationError> {
    let name = signature.name.as_str();
    if signature.is_generic {
        return Err(RegistrationError::invalid(hub, name, "generic methods are not supported"));
    }
    if signature.returns.wrapper != ReturnWrapper::Task {
        return Err(RegistrationError::invalid(
            hub,
            name,
            "hub methods must return a plain async result",
        ));
    }
    build(hub, signature, MethodKind::Unary)
}

fn build(
    service: &str,
    signature: &MethodSignature,
    kind: MethodKind,
) -> Result<MethodDescriptor, RegistrationError> {
    let request = match signature.parameters.as_slice() {
        [] => RequestShape::None,
        [single] => RequestShape::SingleValue(single.clone()),
        params if params.len() > MAX_ARGUMENTS => {
            return Err(RegistrationError::invalid(
                service,
                &signature.name,
                format!("{} parameters exceed the limit of {MAX_ARGUMENTS}", params.len()),
            ));
        }
        params => RequestShape::ArgumentTuple(params.len()),
    };

    let response = match &signature.returns.value {
        ValueType::Nil => ResponseShape::None,
        ValueType::Named(name) => ResponseShape::SingleValue(name.clone()),
    };

    Ok(MethodDescriptor {
        service: Arc::from(service),
        method: Arc::from(signature.name.as_str()),
        signature: signature.clone(),
        kind,
        request,
        response,
    })
}

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Stable 32-bit id of a hub method: FNV-1a over the UTF-8 bytes of its
/// declared name, reinterpreted as `i32`.
#[must_use]
pub const fn method_id(name: &str) -> i32 {
    let bytes = name.as_bytes();
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash as i32
}
