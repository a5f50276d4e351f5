//! Token metadata decoding (spec §4.B): legacy PDA accounts and Token-2022
//! in-mint metadata extensions. Both decoders return `None` on anything
//! malformed; neither ever panics.

use crate::address::{Address, MintAddress};

const MAX_NAME_LEN: u32 = 32;
const MAX_SYMBOL_LEN: u32 = 10;

fn trim(raw: &str) -> String {
    raw.trim_matches('\0').trim().to_string()
}

fn read_len_prefixed_string(bytes: &[u8], offset: usize, max_len: u32) -> Option<(String, usize)> {
    let len_bytes = bytes.get(offset..offset + 4)?;
    let len = u32::from_le_bytes(len_bytes.try_into().unwrap());
    if len == 0 || len > max_len {
        return None;
    }
    let start = offset + 4;
    let data = bytes.get(start..start + len as usize)?;
    let s = std::str::from_utf8(data).ok()?;
    Some((trim(s), start + len as usize))
}

/// Legacy metadata-program PDA account: `kind` byte, then mint, then two
/// length-prefixed UTF-8 strings.
pub fn decode_legacy_pda(raw: &[u8]) -> Option<(MintAddress, String, String)> {
    let kind = *raw.first()?;
    if kind != 0 && kind != 4 {
        return None;
    }
    let mint = Address::from_bytes(raw.get(33..65)?)?;
    let (name, after_name) = read_len_prefixed_string(raw, 65, MAX_NAME_LEN)?;
    let (symbol, _) = read_len_prefixed_string(raw, after_name, MAX_SYMBOL_LEN)?;
    if name.is_empty() || symbol.is_empty() {
        return None;
    }
    Some((mint, name, symbol))
}

const METADATA_EXTENSION_TYPE: u16 = 12;

/// Token-2022 mint account carrying an embedded metadata-extension TLV.
pub fn decode_token2022_extension(raw: &[u8]) -> Option<(MintAddress, String, String)> {
    if raw.len() < 200 {
        return None;
    }
    let mut cursor = 83usize;
    while cursor + 4 <= raw.len() {
        let ty = u16::from_le_bytes(raw.get(cursor..cursor + 2)?.try_into().unwrap());
        let len = u16::from_le_bytes(raw.get(cursor + 2..cursor + 4)?.try_into().unwrap()) as usize;
        let payload_start = cursor + 4;
        let payload = raw.get(payload_start..payload_start + len)?;

        if ty == METADATA_EXTENSION_TYPE {
            return parse_metadata_extension_payload(payload);
        }

        cursor = payload_start + len;
    }
    None
}

fn parse_metadata_extension_payload(payload: &[u8]) -> Option<(MintAddress, String, String)> {
    // 32 bytes update authority, 32 bytes mint, then {len u32, name}, {len u32, symbol}, {len u32, uri}
    let mint = Address::from_bytes(payload.get(32..64)?)?;
    let (name, after_name) = read_len_prefixed_string(payload, 64, u32::MAX)?;
    let (symbol, _) = read_len_prefixed_string(payload, after_name, u32::MAX)?;
    if name.is_empty() || symbol.is_empty() {
        return None;
    }
    Some((mint, name, symbol))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_pda(name: &str, symbol: &str, name_len: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 65];
        buf[0] = 4;
        buf[33..65].copy_from_slice(&[3u8; 32]);
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&(symbol.len() as u32).to_le_bytes());
        buf.extend_from_slice(symbol.as_bytes());
        buf
    }

    #[test]
    fn rejects_name_len_zero() {
        let buf = legacy_pda("Test", "TST", 0);
        assert!(decode_legacy_pda(&buf).is_none());
    }

    #[test]
    fn rejects_name_len_over_32() {
        let buf = legacy_pda("Test", "TST", 33);
        assert!(decode_legacy_pda(&buf).is_none());
    }

    #[test]
    fn accepts_well_formed_legacy_pda() {
        let buf = legacy_pda("Test", "TST", 4);
        let (_, name, symbol) = decode_legacy_pda(&buf).unwrap();
        assert_eq!(name, "Test");
        assert_eq!(symbol, "TST");
    }

    #[test]
    fn trims_nul_and_whitespace() {
        assert_eq!(trim("Test\0\0  "), "Test");
    }
}
