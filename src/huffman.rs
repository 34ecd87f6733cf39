//! HPACK/QPACK Huffman coding (RFC 7541 Appendix B, reused unmodified by
//! QPACK).
//!
//! The code table itself (`HUFFMAN_CODE_ARRAY`) is this crate's copy of
//! the HPACK static Huffman table. The decoder here generalizes this
//! crate's original bit-at-a-time `HuffmanDecoder` into a resumable state
//! machine that can be fed successive chunks of input, and adds the
//! missing encoder.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HuffmanError {
    /// Leftover padding bits after the last full code were strictly more
    /// than 7 bits.
    PaddingTooLarge,
    /// Leftover padding bits were not all 1s, i.e. did not correspond to
    /// the most-significant bits of EOS.
    InvalidPadding,
    /// The EOS symbol's code appeared as part of the string itself.
    EosInString,
}

impl HuffmanError {
    pub(crate) fn description_str(&self) -> &'static str {
        match self {
            HuffmanError::PaddingTooLarge => "huffman padding too large",
            HuffmanError::InvalidPadding => "huffman padding is not all ones",
            HuffmanError::EosInString => "huffman EOS symbol found in string",
        }
    }
}

impl fmt::Display for HuffmanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description_str())
    }
}

const EOS_CODE: u32 = 0x3fff_ffff;
const EOS_LEN: u8 = 30;

/// Encodes `src`, returning the exact number of bits the unpadded
/// representation needs (used by callers that want to precompute the
/// encoded byte length before allocating).
pub fn encoded_bit_len(src: &[u8]) -> u64 {
    src.iter().map(|&b| HUFFMAN_CODE_ARRAY[b as usize].1 as u64).sum()
}

/// Exact number of bytes `encode` will write for `src`, padding included.
pub fn encoded_len(src: &[u8]) -> usize {
    ((encoded_bit_len(src) + 7) / 8) as usize
}

/// Huffman-encodes `src` into `dst`, MSB-first, padding the final partial
/// byte with 1 bits. Returns the number of bytes written, or `None` if
/// `dst` is too small.
pub fn encode(dst: &mut [u8], src: &[u8]) -> Option<usize> {
    let need = encoded_len(src);
    if dst.len() < need {
        return None;
    }
    dst[..need].fill(0);

    let mut byte_idx = 0usize;
    let mut bit_pos: u8 = 0; // number of bits already used in dst[byte_idx]

    for &b in src {
        let (mut code, mut len) = HUFFMAN_CODE_ARRAY[b as usize];
        while len > 0 {
            let free = 8 - bit_pos;
            let take = free.min(len);
            // Top `take` bits of `code` (which has `len` significant bits).
            let shift = len - take;
            let bits = ((code >> shift) & ((1u32 << take) - 1)) as u8;
            dst[byte_idx] |= bits << (free - take);
            bit_pos += take;
            len -= take;
            code &= (1u32 << len) - 1;
            if bit_pos == 8 {
                byte_idx += 1;
                bit_pos = 0;
            }
        }
    }

    if bit_pos != 0 {
        // Pad the final byte with 1s in the remaining low bits.
        let pad = 8 - bit_pos;
        dst[byte_idx] |= (1u8 << pad) - 1;
    }

    Some(need)
}

/// Resumable Huffman decoder. Feed it successive chunks of input via
/// [`decode`]; call [`finish`] once the declared string length has been
/// consumed to validate the trailing padding.
///
/// [`decode`]: HuffmanDecoder::decode
/// [`finish`]: HuffmanDecoder::finish
#[derive(Debug, Clone)]
pub struct HuffmanDecoder {
    accum: u32,
    accum_len: u8,
    out: Vec<u8>,
}

impl HuffmanDecoder {
    pub fn new() -> Self {
        HuffmanDecoder { accum: 0, accum_len: 0, out: Vec::new() }
    }

    /// Feeds more encoded bytes; appends decoded bytes into the decoder's
    /// internal output buffer (retrievable via [`take_output`]).
    ///
    /// [`take_output`]: HuffmanDecoder::take_output
    pub fn decode(&mut self, buf: &[u8]) -> Result<(), HuffmanError> {
        for &byte in buf {
            for bit_pos in (0..8).rev() {
                let bit = (byte >> bit_pos) & 1;
                self.accum = (self.accum << 1) | bit as u32;
                self.accum_len += 1;

                if self.accum_len as u32 == EOS_LEN && self.accum == EOS_CODE {
                    return Err(HuffmanError::EosInString);
                }

                if let Some(&symbol) = HUFFMAN_DECODE_MAP.get(&(self.accum, self.accum_len)) {
                    self.out.push(symbol);
                    self.accum = 0;
                    self.accum_len = 0;
                }
            }
        }
        Ok(())
    }

    /// Validates that any bits left in the accumulator form a legal
    /// padding (at most 7 bits, all 1s) and returns the fully decoded
    /// string so far.
    pub fn finish(mut self) -> Result<Vec<u8>, HuffmanError> {
        if self.accum_len > 7 {
            return Err(HuffmanError::PaddingTooLarge);
        }
        if self.accum_len > 0 {
            let all_ones = self.accum == (1u32 << self.accum_len) - 1;
            if !all_ones {
                return Err(HuffmanError::InvalidPadding);
            }
        }
        Ok(std::mem::take(&mut self.out))
    }

    /// One-shot helper equivalent to `decode` followed by `finish`.
    pub fn decode_all(buf: &[u8]) -> Result<Vec<u8>, HuffmanError> {
        let mut dec = HuffmanDecoder::new();
        dec.decode(buf)?;
        dec.finish()
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }
}

impl Default for HuffmanDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// (code, length in bits) indexed by the byte value it decodes to. Taken
/// from RFC 7541 Appendix B.
static HUFFMAN_CODE_ARRAY: [(u32, u8); 256] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28),
    (0xfffffe4, 28), (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28),
    (0xfffffe8, 28), (0xffffea, 24), (0x3ffffffc, 30), (0xfffffe9, 28),
    (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28), (0xfffffec, 28),
    (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28),
    (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28),
    (0xffffff4, 28), (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28),
    (0xffffff8, 28), (0xffffff9, 28), (0xffffffa, 28), (0xffffffb, 28),
    (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12),
    (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11),
    (0x3fa, 10), (0x3fb, 10), (0xf9, 8), (0x7fb, 11),
    (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6),
    (0x0, 5), (0x1, 5), (0x2, 5), (0x19, 6),
    (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6),
    (0x1e, 6), (0x1f, 6), (0x5c, 7), (0xfb, 8),
    (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10),
    (0x1ffa, 13), (0x21, 6), (0x5d, 7), (0x5e, 7),
    (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7),
    (0x63, 7), (0x64, 7), (0x65, 7), (0x66, 7),
    (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7),
    (0x6b, 7), (0x6c, 7), (0x6d, 7), (0x6e, 7),
    (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7),
    (0xfc, 8), (0x73, 7), (0xfd, 8), (0x1ffb, 13),
    (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6),
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5),
    (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6),
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7),
    (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5),
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5),
    (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7),
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15),
    (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13), (0xffffffc, 28),
    (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20),
    (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23),
    (0x3fffd6, 22), (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23),
    (0x7fffdd, 23), (0x7fffde, 23), (0xffffeb, 24), (0x7fffdf, 23),
    (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22), (0x7fffe0, 23),
    (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23),
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23),
    (0x3fffd9, 22), (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24),
    (0x3fffda, 22), (0x1fffdd, 21), (0xfffe9, 20), (0x3fffdb, 22),
    (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23), (0x1fffde, 21),
    (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24),
    (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23),
    (0x1fffe0, 21), (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21),
    (0x7fffed, 23), (0x3fffe1, 22), (0x7fffee, 23), (0x7fffef, 23),
    (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22), (0x3fffe4, 22),
    (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23),
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19),
    (0x3fffe7, 22), (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25),
    (0x3ffffe2, 26), (0x3ffffe3, 26), (0x3ffffe4, 26), (0x7ffffde, 27),
    (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24), (0x1ffffed, 25),
    (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27),
    (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24),
    (0x1fffe4, 21), (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26),
    (0xffffffd, 28), (0x7ffffe3, 27), (0x7ffffe4, 27), (0x7ffffe5, 27),
    (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20), (0x1fffe6, 21),
    (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23),
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25),
    (0xfffff4, 24), (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23),
    (0x3ffffeb, 26), (0x7ffffe6, 27), (0x3ffffec, 26), (0x3ffffed, 26),
    (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27), (0x7ffffea, 27),
    (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27),
    (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26),
    (0x3fffffff, 30),
];

use std::collections::HashMap;
use lazy_static::lazy_static;

lazy_static! {
    static ref HUFFMAN_DECODE_MAP: HashMap<(u32, u8), u8> = {
        let mut m = HashMap::with_capacity(256);
        for (symbol, &(code, len)) in HUFFMAN_CODE_ARRAY.iter().enumerate() {
            m.insert((code, len), symbol as u8);
        }
        m
    };
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip(s: &[u8]) {
        let mut buf = vec![0u8; encoded_len(s) + 1];
        let n = encode(&mut buf, s).unwrap();
        assert_eq!(n, encoded_len(s));
        let decoded = HuffmanDecoder::decode_all(&buf[..n]).unwrap();
        assert_eq!(decoded, s);
    }

    #[test]
    fn round_trips_ascii_strings() {
        round_trip(b"www.example.com");
        round_trip(b"");
        round_trip(b"method");
        round_trip(b"dude: where is my car?");
    }

    #[test]
    fn resumable_across_any_split() {
        let s = b"www.example.com";
        let mut buf = vec![0u8; encoded_len(s)];
        let n = encode(&mut buf, s).unwrap();
        for split in 0..=n {
            let mut dec = HuffmanDecoder::new();
            dec.decode(&buf[..split]).unwrap();
            dec.decode(&buf[split..n]).unwrap();
            assert_eq!(dec.finish().unwrap(), s);
        }
    }

    #[test]
    fn encodes_method_to_known_huffman_bytes() {
        // Huffman("method") == A4 A9 9C F2 7F (5 bytes, the value string
        // body only; an H-bit + length prefix byte precedes it on the
        // wire but is not part of the Huffman payload itself).
        let mut buf = [0u8; 16];
        let n = encode(&mut buf, b"method").unwrap();
        assert_eq!(&buf[..n], &[0xA4, 0xA9, 0x9C, 0xF2, 0x7F]);
    }
}
