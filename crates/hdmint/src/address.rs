use core::{fmt, str::FromStr};
use sha3::{Digest, Keccak256};

/// Keccak-256 as used by Ethereum (original Keccak padding, not SHA3-256).
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// A 20-byte Ethereum account address.
///
/// Displayed and serialized in its EIP-55 mixed-case checksum form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// The last 20 bytes of `keccak256(X || Y)`.
    pub fn from_public_key(uncompressed: &[u8; 64]) -> Self {
        let hash = keccak256(uncompressed);
        let mut bytes = [0_u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Self(bytes)
    }

    /// Renders the EIP-55 checksum form, e.g.
    /// `0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed`.
    ///
    /// A hex letter is uppercased when the matching nibble of
    /// `keccak256(lowercase_hex)` is 8 or more.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

/// Returns `true` if `s` is a `0x`-prefixed address whose letter casing matches
/// its EIP-55 checksum exactly.
pub fn is_checksum_valid(s: &str) -> bool {
    s.parse::<Address>()
        .is_ok_and(|address| address.to_checksum() == s)
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.to_checksum()).finish()
    }
}

/// Errors from parsing an [`Address`] string.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address must start with 0x")]
    MissingPrefix,
    #[error("address must have 40 hex digits, got {len}")]
    InvalidLength { len: usize },
    #[error("invalid hex character {byte:?}")]
    InvalidHex { byte: char },
    #[error("checksum mismatch, expected {expected}")]
    Checksum { expected: String },
}

impl FromStr for Address {
    type Err = AddressError;

    /// Accepts all-lowercase or all-uppercase hex without a checksum check.
    /// Mixed case must match EIP-55.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(AddressError::MissingPrefix)?;
        if digits.len() != 40 {
            return Err(AddressError::InvalidLength { len: digits.len() });
        }
        if let Some(byte) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(AddressError::InvalidHex { byte });
        }

        let mut bytes = [0_u8; 20];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| AddressError::InvalidHex { byte: '?' })?;
        let address = Self(bytes);

        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper {
            let expected = address.to_checksum();
            if expected[2..] != *digits {
                return Err(AddressError::Checksum { expected });
            }
        }

        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EIP55_VECTORS: [&str; 4] = [
        "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
        "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
        "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
    ];

    #[test]
    fn eip55_vectors() {
        for vector in EIP55_VECTORS {
            let lower = vector.to_ascii_lowercase();
            let address: Address = lower.parse().unwrap();
            assert_eq!(address.to_checksum(), vector);
            assert_eq!(address.to_string(), vector);
            assert!(is_checksum_valid(vector));
        }
    }

    #[test]
    fn keccak_of_empty_input() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn parse_rejects_bad_casing() {
        let flipped = "0x5AAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        assert!(matches!(
            flipped.parse::<Address>(),
            Err(AddressError::Checksum { .. })
        ));
        assert!(!is_checksum_valid(flipped));
        // Single-case input carries no checksum, so it parses but is not canonical.
        assert!("0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED".parse::<Address>().is_ok());
        assert!(!is_checksum_valid("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"));
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(
            "5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".parse::<Address>(),
            Err(AddressError::MissingPrefix)
        );
        assert_eq!(
            "0x5aAeb6".parse::<Address>(),
            Err(AddressError::InvalidLength { len: 6 })
        );
        assert_eq!(
            "0xzaAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".parse::<Address>(),
            Err(AddressError::InvalidHex { byte: 'z' })
        );
    }

    #[test]
    fn from_public_key_takes_hash_tail() {
        let key = [7_u8; 64];
        let address = Address::from_public_key(&key);
        assert_eq!(address.as_bytes()[..], keccak256(&key)[12..]);
    }
}
