//! Address encodings.
//!
//! Every address is stored twice: the raw form (`0x` + 40 lowercase hex
//! chars) and the human-readable bech32 form with the `zil` prefix.

use bech32::{Bech32, Hrp};
use sha2::{Digest, Sha256};

use crate::error::DecodeError;

/// Human-readable prefix for bech32 addresses.
pub const HRP: Hrp = Hrp::parse_unchecked("zil");

/// The all-zero address used as `toAddr` of contract deployments.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Normalise an address to lowercase `0x` hex.
///
/// Accepts raw hex with or without the `0x` prefix, or a bech32 address.
pub fn normalize(addr: &str) -> Result<String, DecodeError> {
    if addr.starts_with("zil1") {
        return from_bech32(addr);
    }
    let bytes = raw_bytes(addr)?;
    Ok(format!("0x{}", hex::encode(bytes)))
}

/// Encode a raw address as bech32.
pub fn to_bech32(addr: &str) -> Result<String, DecodeError> {
    let bytes = raw_bytes(addr)?;
    bech32::encode::<Bech32>(HRP, &bytes).map_err(|e| DecodeError::InvalidAddress {
        value: addr.to_string(),
        reason: e.to_string(),
    })
}

/// Decode a bech32 address into lowercase `0x` hex.
pub fn from_bech32(addr: &str) -> Result<String, DecodeError> {
    let (hrp, bytes) = bech32::decode(addr).map_err(|e| DecodeError::InvalidAddress {
        value: addr.to_string(),
        reason: e.to_string(),
    })?;
    if hrp != HRP {
        return Err(DecodeError::InvalidAddress {
            value: addr.to_string(),
            reason: format!("unexpected prefix '{hrp}'"),
        });
    }
    if bytes.len() != 20 {
        return Err(DecodeError::InvalidAddress {
            value: addr.to_string(),
            reason: format!("expected 20 bytes, got {}", bytes.len()),
        });
    }
    Ok(format!("0x{}", hex::encode(bytes)))
}

/// Derive the raw address of an account from its public key.
///
/// The address is the last 20 bytes of the SHA-256 digest of the key.
pub fn from_public_key(pub_key: &str) -> Result<String, DecodeError> {
    let key = pub_key.strip_prefix("0x").unwrap_or(pub_key);
    let bytes = hex::decode(key).map_err(|e| DecodeError::InvalidAddress {
        value: pub_key.to_string(),
        reason: e.to_string(),
    })?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("0x{}", hex::encode(&digest[12..])))
}

/// Returns `(raw, bech32)` for a raw or bech32 address.
pub fn both(addr: &str) -> Result<(String, String), DecodeError> {
    let raw = normalize(addr)?;
    let bech32 = to_bech32(&raw)?;
    Ok((raw, bech32))
}

fn raw_bytes(addr: &str) -> Result<Vec<u8>, DecodeError> {
    let hex_part = addr
        .strip_prefix("0x")
        .or_else(|| addr.strip_prefix("0X"))
        .unwrap_or(addr);
    let bytes = hex::decode(hex_part).map_err(|e| DecodeError::InvalidAddress {
        value: addr.to_string(),
        reason: e.to_string(),
    })?;
    if bytes.len() != 20 {
        return Err(DecodeError::InvalidAddress {
            value: addr.to_string(),
            reason: format!("expected 20 bytes, got {}", bytes.len()),
        });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "0x9bfec715a6bd658fcb62b0f8cc9bfa2ade71434a";
    const BECH32: &str = "zil1n0lvw9dxh4jcljmzkruvexl69t08zs62ds9ats";

    #[test]
    fn raw_to_bech32() {
        assert_eq!(to_bech32(RAW).unwrap(), BECH32);
        assert_eq!(to_bech32("9BfEC715a6bD658fCb62B0f8cc9BFa2ADE71434A").unwrap(), BECH32);
    }

    #[test]
    fn bech32_to_raw() {
        assert_eq!(from_bech32(BECH32).unwrap(), RAW);
        assert_eq!(normalize(BECH32).unwrap(), RAW);
    }

    #[test]
    fn normalize_lowercases_and_prefixes() {
        assert_eq!(normalize("9BfEC715a6bD658fCb62B0f8cc9BFa2ADE71434A").unwrap(), RAW);
    }

    #[test]
    fn public_key_to_address() {
        let addr = from_public_key(
            "0x0246E7178DC8253201101E18FD6F6EB9972451D121FC57AA2A06DD5C111E58DC6A",
        )
        .unwrap();
        assert_eq!(addr, RAW);
    }

    #[test]
    fn short_address_is_rejected() {
        assert!(matches!(
            normalize("0xabc"),
            Err(DecodeError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn both_forms() {
        let (raw, bech) = both(BECH32).unwrap();
        assert_eq!(raw, RAW);
        assert_eq!(bech, BECH32);
    }
}
