// SPDX-License-Identifier: MPL-2.0

//! Sizing of the tag table.

use crate::error::{Error, Result};

/// The widest ASID field supported.
pub const MAX_ASID_BITS: u32 = 16;

/// The ASID width used when nothing else is configured.
pub const DEFAULT_ASID_BITS: u32 = 8;

const MAX_NUM_TAGS: u32 = 1 << MAX_ASID_BITS;

/// The shape of the tag space managed by an [`AsidAllocator`].
///
/// Tags `0..reserved_tags` are kept out of the rotation. Tag 0 belongs to the
/// kernel address space; the remaining reserved tags, if any, are never handed
/// out. Tags `reserved_tags..num_tags` are allocated round-robin.
///
/// [`AsidAllocator`]: crate::AsidAllocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsidConfig {
    num_tags: u32,
    reserved_tags: u32,
}

impl AsidConfig {
    /// Creates a configuration with `num_tags` tags of which the first
    /// `reserved_tags` are kept out of the rotation.
    pub fn new(num_tags: u32, reserved_tags: u32) -> Result<Self> {
        if !(2..=MAX_NUM_TAGS).contains(&num_tags) {
            return Err(Error::InvalidTagCount(num_tags));
        }
        if reserved_tags == 0 || reserved_tags >= num_tags {
            return Err(Error::InvalidReservedCount {
                reserved: reserved_tags,
                num_tags,
            });
        }
        Ok(Self {
            num_tags,
            reserved_tags,
        })
    }

    /// Creates a configuration covering every value of a `bits`-wide ASID
    /// field, with only the kernel tag reserved.
    pub fn from_asid_bits(bits: u32) -> Result<Self> {
        if bits == 0 || bits > MAX_ASID_BITS {
            return Err(Error::InvalidAsidBits(bits));
        }
        Self::new(1 << bits, 1)
    }

    /// Applies one `key=value` option, as found in `asid.key=value` on the
    /// kernel command line.
    ///
    /// Recognized keys are `bits`, `num_tags` and `reserved`. The `log_level`
    /// key belongs to the logger and is accepted without effect. On error the
    /// configuration is left unchanged.
    pub fn apply_module_arg(&mut self, key: &str, value: &str) -> Result<()> {
        let parse = |value: &str| value.parse::<u32>().map_err(|_| Error::InvalidValue);

        let updated = match key {
            "bits" => {
                let bits = parse(value)?;
                if bits == 0 || bits > MAX_ASID_BITS {
                    return Err(Error::InvalidAsidBits(bits));
                }
                Self::new(1 << bits, self.reserved_tags)?
            }
            "num_tags" => Self::new(parse(value)?, self.reserved_tags)?,
            "reserved" => Self::new(self.num_tags, parse(value)?)?,
            "log_level" => *self,
            _ => return Err(Error::UnknownOption),
        };
        *self = updated;
        Ok(())
    }

    /// Returns the total number of tags, reserved ones included.
    pub const fn num_tags(&self) -> u32 {
        self.num_tags
    }

    /// Returns the number of tags kept out of the rotation.
    pub const fn reserved_tags(&self) -> u32 {
        self.reserved_tags
    }

    /// Returns how many tags take part in the rotation.
    pub const fn rotating_tags(&self) -> u32 {
        self.num_tags - self.reserved_tags
    }
}

impl Default for AsidConfig {
    fn default() -> Self {
        Self {
            num_tags: 1 << DEFAULT_ASID_BITS,
            reserved_tags: 1,
        }
    }
}
