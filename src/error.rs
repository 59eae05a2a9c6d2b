//! Error types for construction and materialization.

use core::fmt;
use std::error::Error;

/// Allocation failure while building a shared representation.
///
/// Construction is all-or-nothing: by the time a caller sees this error every
/// child handle created for the failed attempt has already been released.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The configured memory budget cannot cover the request.
    BudgetExhausted {
        /// Bytes the failed step asked for.
        requested: usize,
        /// Bytes left in the budget at the time of the request.
        remaining: usize,
    },
    /// The system allocator refused to reserve the backing storage.
    OutOfMemory {
        /// Bytes the failed step asked for.
        requested: usize,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BudgetExhausted {
                requested,
                remaining,
            } => write!(
                f,
                "shared memory budget exhausted: requested {requested} bytes, {remaining} remaining"
            ),
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory reserving {requested} bytes")
            }
        }
    }
}

impl Error for AllocError {}

/// What went wrong while decoding a serialized blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Input ended in the middle of a value.
    UnexpectedEnd,
    /// A specific delimiter byte was required.
    Expected(u8),
    /// The byte does not start any known value.
    UnknownTag(u8),
    /// An integer, double or length field did not parse.
    InvalidNumber,
    /// A string payload is not valid UTF-8.
    InvalidUtf8,
    /// Array keys must be integers or strings.
    InvalidKey,
    /// `V:` names a collection kind that does not exist.
    UnknownCollection,
    /// `R:n;` pointed at a container that has not been opened.
    BadBackReference(usize),
    /// Bytes remain after the top-level value.
    TrailingBytes,
    /// Containers nest deeper than the decoder allows.
    TooDeep,
}

/// Malformed serialized blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeError {
    /// Byte offset where decoding stopped.
    pub offset: usize,
    pub kind: DecodeErrorKind,
}

impl DecodeError {
    pub(crate) fn new(offset: usize, kind: DecodeErrorKind) -> Self {
        Self { offset, kind }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DecodeErrorKind::UnexpectedEnd => {
                write!(f, "unexpected end of input at byte {}", self.offset)
            }
            DecodeErrorKind::Expected(b) => write!(
                f,
                "expected '{}' at byte {}",
                char::from(*b).escape_default(),
                self.offset
            ),
            DecodeErrorKind::UnknownTag(b) => write!(
                f,
                "unknown value tag '{}' at byte {}",
                char::from(*b).escape_default(),
                self.offset
            ),
            DecodeErrorKind::InvalidNumber => {
                write!(f, "invalid number at byte {}", self.offset)
            }
            DecodeErrorKind::InvalidUtf8 => {
                write!(f, "invalid utf-8 in string at byte {}", self.offset)
            }
            DecodeErrorKind::InvalidKey => {
                write!(f, "array key must be int or string at byte {}", self.offset)
            }
            DecodeErrorKind::UnknownCollection => {
                write!(f, "unknown collection kind at byte {}", self.offset)
            }
            DecodeErrorKind::BadBackReference(n) => {
                write!(f, "back-reference {n} is out of range at byte {}", self.offset)
            }
            DecodeErrorKind::TrailingBytes => {
                write!(f, "trailing bytes after value at byte {}", self.offset)
            }
            DecodeErrorKind::TooDeep => {
                write!(f, "containers nested too deeply at byte {}", self.offset)
            }
        }
    }
}

impl Error for DecodeError {}
