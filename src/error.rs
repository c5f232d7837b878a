//! The public error surface: one kind enum, one error struct.
use std::fmt;

use num_enum::IntoPrimitive;

/// Error kinds, matching the source's fixed taxonomy one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum XndErrorKind {
    Value,
    Type,
    Index,
    Memory,
    NotImplemented,
    Runtime,
    Os,
    InvalidArgument,
}

impl fmt::Display for XndErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            XndErrorKind::Value => "ValueError",
            XndErrorKind::Type => "TypeError",
            XndErrorKind::Index => "IndexError",
            XndErrorKind::Memory => "MemoryError",
            XndErrorKind::NotImplemented => "NotImplementedError",
            XndErrorKind::Runtime => "RuntimeError",
            XndErrorKind::Os => "OSError",
            XndErrorKind::InvalidArgument => "InvalidArgumentError",
        };
        f.write_str(s)
    }
}

/// `{kind, message}`, ASCII messages only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XndError {
    pub kind: XndErrorKind,
    pub message: String,
}

impl XndError {
    pub fn new(kind: XndErrorKind, message: impl Into<String>) -> Self {
        XndError {
            kind,
            message: message.into(),
        }
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(XndErrorKind::Value, message)
    }

    pub fn type_err(message: impl Into<String>) -> Self {
        Self::new(XndErrorKind::Type, message)
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::new(XndErrorKind::Index, message)
    }

    pub fn memory(message: impl Into<String>) -> Self {
        Self::new(XndErrorKind::Memory, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(XndErrorKind::NotImplemented, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(XndErrorKind::Runtime, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(XndErrorKind::InvalidArgument, message)
    }
}

impl fmt::Display for XndError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for XndError {}

impl From<anyhow::Error> for XndError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<XndError>() {
            Ok(xe) => xe,
            Err(e) => XndError::runtime(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, XndError>;
