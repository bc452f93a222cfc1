//! Fixed-size byte bufs for addresses, topics, and block hashes.

use std::str::FromStr;

use alloy_primitives::FixedBytes;
use arbitrary::{Arbitrary, Unstructured};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 20-byte buf, used for contract addresses.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Buf20(pub FixedBytes<20>);

/// 32-byte buf, used for topics and block hashes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Buf32(pub FixedBytes<32>);

macro_rules! impl_buf_common {
    ($name:ident, $len:expr) => {
        impl $name {
            pub const LEN: usize = $len;

            pub fn new(data: [u8; $len]) -> Self {
                Self(data.into())
            }

            pub fn zero() -> Self {
                Self([0; $len].into())
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            pub fn as_slice(&self) -> &[u8] {
                self.0.as_slice()
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0 .0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(data: [u8; $len]) -> Self {
                Self(data.into())
            }
        }

        impl From<$name> for [u8; $len] {
            fn from(buf: $name) -> Self {
                buf.0 .0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                self.0.as_ref()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:x}", self.0)
            }
        }

        impl BorshSerialize for $name {
            fn serialize<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
                writer.write_all(self.0.as_slice())
            }
        }

        impl BorshDeserialize for $name {
            fn deserialize_reader<R: std::io::Read>(reader: &mut R) -> std::io::Result<Self> {
                let mut array = [0u8; $len];
                reader.read_exact(&mut array)?;
                Ok(Self(array.into()))
            }
        }

        impl<'a> Arbitrary<'a> for $name {
            fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
                let mut array = [0u8; $len];
                u.fill_buffer(&mut array)?;
                Ok(Self(array.into()))
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let mut array = [0u8; $len];
                hex::decode_to_slice(s, &mut array)?;
                Ok(Self(array.into()))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&format!("{self}"))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as Deserialize>::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

impl_buf_common!(Buf20, 20);
impl_buf_common!(Buf32, 32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parse_roundtrip() {
        let buf: Buf32 = "0x00000000000000000000000000000000000000000000000000000000000000ff"
            .parse()
            .unwrap();
        assert_eq!(buf.as_bytes()[31], 0xff);
        assert_eq!(format!("{buf}").parse::<Buf32>().unwrap(), buf);
    }

    #[test]
    fn borsh_fixed_width() {
        let buf = Buf20::new([7; 20]);
        let bytes = borsh::to_vec(&buf).unwrap();
        assert_eq!(bytes.len(), 20);
        let back = Buf20::try_from_slice(&bytes).unwrap();
        assert_eq!(back, buf);
    }
}
