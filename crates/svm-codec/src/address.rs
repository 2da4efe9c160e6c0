//! Fixed-size account identifiers

use std::fmt;
use std::str::FromStr;

/// Length of an address in bytes
pub const ADDRESS_LENGTH: usize = 20;

/// Length of an app state root in bytes
pub const STATE_LENGTH: usize = 32;

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// The all-zero value
            pub const ZERO: $name = $name([0u8; $len]);

            /// Build from a byte slice
            ///
            /// Copies at most the fixed length; shorter input leaves the
            /// remaining bytes zero.
            pub fn from_bytes(bytes: &[u8]) -> Self {
                let mut out = [0u8; $len];
                let n = bytes.len().min($len);
                out[..n].copy_from_slice(&bytes[..n]);
                $name(out)
            }

            /// Borrow the raw bytes
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Whether every byte is zero
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::ZERO
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                $name(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let mut out = [0u8; $len];
                hex::decode_to_slice(s, &mut out)?;
                Ok($name(out))
            }
        }
    };
}

fixed_bytes!(
    /// A 20-byte template or app address
    Address,
    ADDRESS_LENGTH
);

fixed_bytes!(
    /// A 32-byte app state root
    State,
    STATE_LENGTH
);
