//! Compression Codec
//!
//! Run-length style codec applied to every value before it reaches the
//! engine. The workload it targets is dominated by zero padding and by two
//! well-known 32-byte digests, so those are the only patterns it shortens.
//!
//! ## Encoding
//! ```text
//! byte != 0xFE          → copied as is
//! 0xFE 0xFF             → a literal 0xFE
//! 0xFE 0xFD             → EMPTY_DIGEST        (32 bytes)
//! 0xFE 0xFE             → EMPTY_TRIE_DIGEST   (32 bytes)
//! 0xFE n  (2..=0xFC)    → n - 2 zero bytes
//! ```
//!
//! Input without any `0xFE` byte decodes to itself.

use thiserror::Error;

/// Escape byte that introduces every token
const TOKEN: u8 = 0xFE;

/// `TOKEN EMPTY_DIGEST_CODE` stands for [`EMPTY_DIGEST`]
const EMPTY_DIGEST_CODE: u8 = 0xFD;

/// `TOKEN EMPTY_TRIE_CODE` stands for [`EMPTY_TRIE_DIGEST`]
const EMPTY_TRIE_CODE: u8 = 0xFE;

/// `TOKEN LITERAL_TOKEN_CODE` stands for a single `TOKEN` byte
const LITERAL_TOKEN_CODE: u8 = 0xFF;

/// Offset added to a zero-run length to form its code
const RUN_BIAS: u8 = 2;

/// Longest zero run a single token may carry (code 0xFC)
const MAX_RUN: usize = (EMPTY_DIGEST_CODE - 1 - RUN_BIAS) as usize;

/// Keccak-256 of the empty byte string
pub const EMPTY_DIGEST: [u8; 32] = [
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
];

/// Keccak-256 of the RLP encoding of the empty string (the empty trie root)
pub const EMPTY_TRIE_DIGEST: [u8; 32] = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
];

/// A stored value that is not a valid encoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("token at offset {offset} has no code byte")]
    TruncatedToken { offset: usize },

    #[error("invalid token code {code:#04x} at offset {offset}")]
    InvalidCode { offset: usize, code: u8 },
}

/// Compress a logical value into its stored form
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut pos = 0;

    while pos < data.len() {
        let rest = &data[pos..];

        if rest[0] == TOKEN {
            out.extend_from_slice(&[TOKEN, LITERAL_TOKEN_CODE]);
            pos += 1;
            continue;
        }

        if rest.len() > 1 && rest[0] == 0 && rest[1] == 0 {
            let run = rest.iter().take(MAX_RUN).take_while(|&&b| b == 0).count();
            out.extend_from_slice(&[TOKEN, run as u8 + RUN_BIAS]);
            pos += run;
            continue;
        }

        if rest.len() >= 32 {
            if rest[..32] == EMPTY_DIGEST {
                out.extend_from_slice(&[TOKEN, EMPTY_DIGEST_CODE]);
                pos += 32;
                continue;
            }
            if rest[..32] == EMPTY_TRIE_DIGEST {
                out.extend_from_slice(&[TOKEN, EMPTY_TRIE_CODE]);
                pos += 32;
                continue;
            }
        }

        out.push(rest[0]);
        pos += 1;
    }

    out
}

/// Decompress a stored value back into its logical form
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(data.len());
    let mut pos = 0;

    while pos < data.len() {
        let byte = data[pos];
        if byte != TOKEN {
            out.push(byte);
            pos += 1;
            continue;
        }

        let code = *data
            .get(pos + 1)
            .ok_or(DecodeError::TruncatedToken { offset: pos })?;

        match code {
            EMPTY_DIGEST_CODE => out.extend_from_slice(&EMPTY_DIGEST),
            EMPTY_TRIE_CODE => out.extend_from_slice(&EMPTY_TRIE_DIGEST),
            LITERAL_TOKEN_CODE => out.push(TOKEN),
            c if c >= RUN_BIAS => out.resize(out.len() + (c - RUN_BIAS) as usize, 0),
            c => return Err(DecodeError::InvalidCode { offset: pos, code: c }),
        }
        pos += 2;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_codes_stay_below_reserved_codes() {
        assert_eq!(MAX_RUN, 250);
        assert!((MAX_RUN as u8 + RUN_BIAS) < EMPTY_DIGEST_CODE);
    }

    #[test]
    fn long_zero_run_splits_into_several_tokens() {
        let data = vec![0u8; 600];
        let stored = compress(&data);
        assert_eq!(stored, vec![TOKEN, 252, TOKEN, 252, TOKEN, 102]);
        assert_eq!(decompress(&stored).unwrap(), data);
    }
}
