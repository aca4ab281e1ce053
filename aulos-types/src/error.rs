//! Error taxonomy shared by the codec, address, and pattern-matching modules.
//!
//! No single variant maps to a Rust standard-library error; each corresponds to
//! one of the failure kinds a caller needs to branch on (a malformed argument
//! vs. a truncated buffer vs. an address-space name collision).

use std::fmt;

/// Errors raised while building, parsing, or matching OSC values.
#[derive(Debug, Clone, PartialEq)]
pub enum OscError {
    /// A value had no matching [`crate::Argument`] variant.
    TypeMismatch { detail: String },
    /// A numeric value fell outside the range its variant allows.
    OutOfRange { detail: String },
    /// A `Char` argument was not exactly one code unit.
    InvalidChar { detail: String },
    /// Parsing ran off the end of the input buffer.
    Truncated { detail: String },
    /// A built or parsed packet was not a multiple of 4 bytes.
    Alignment { detail: String },
    /// The first byte of a packet was neither `/` nor `#`.
    PacketStart,
    /// A `Message` did not begin with `/`.
    MessageStart,
    /// A `Bundle` did not begin with `#bundle\0`.
    BundleStart,
    /// A node name collided with an existing node of a different kind.
    Duplicate { name: String },
    /// `address_space` was set on a non-root [`crate::AddressNode`].
    IllegalRoot,
    /// Both sides of an `Address::matches` call were non-concrete.
    NeedsConcrete,
    /// An `Address::join` argument contained `//`.
    ValueError { detail: String },
}

impl fmt::Display for OscError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { detail } => write!(f, "no argument variant for value: {detail}"),
            Self::OutOfRange { detail } => write!(f, "value out of range: {detail}"),
            Self::InvalidChar { detail } => write!(f, "invalid char argument: {detail}"),
            Self::Truncated { detail } => write!(f, "truncated input: {detail}"),
            Self::Alignment { detail } => write!(f, "packet not 4-byte aligned: {detail}"),
            Self::PacketStart => write!(f, "expected '/' or '#' as first byte"),
            Self::MessageStart => write!(f, "expected '/' as first byte of message"),
            Self::BundleStart => write!(f, "expected \"#bundle\\0\" at start of bundle"),
            Self::Duplicate { name } => write!(f, "node \"{name}\" already exists with a different kind"),
            Self::IllegalRoot => write!(f, "address_space can only be set on a root node"),
            Self::NeedsConcrete => write!(f, "at least one side of a match must be concrete"),
            Self::ValueError { detail } => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for OscError {}

pub type Result<T> = std::result::Result<T, OscError>;
