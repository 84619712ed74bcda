// SPDX-License-Identifier: MPL-2.0

use core::fmt;

/// The error type of ASID configuration.
///
/// Allocating and releasing tags never fails; only building an
/// [`AsidConfig`](crate::AsidConfig) can.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The ASID width is zero or wider than the widest supported field.
    InvalidAsidBits(u32),
    /// The number of tags is too small to leave a rotating tag, or too large
    /// for a 16-bit ASID.
    InvalidTagCount(u32),
    /// The reserved tags do not leave at least one tag for rotation, or there
    /// is no reserved slot for the kernel.
    InvalidReservedCount { reserved: u32, num_tags: u32 },
    /// A configuration option with an unknown name.
    UnknownOption,
    /// A configuration option whose value cannot be parsed.
    InvalidValue,
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidAsidBits(bits) => write!(f, "unsupported ASID width: {} bits", bits),
            Error::InvalidTagCount(num_tags) => write!(f, "unsupported number of tags: {}", num_tags),
            Error::InvalidReservedCount { reserved, num_tags } => write!(
                f,
                "{} reserved tags do not fit in {} tags",
                reserved, num_tags
            ),
            Error::UnknownOption => f.write_str("unknown ASID option"),
            Error::InvalidValue => f.write_str("invalid value for ASID option"),
        }
    }
}

impl core::error::Error for Error {}
