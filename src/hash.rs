//! A single fixed-seed hash function shared by the static table, the
//! dynamic table and the decoder's optional hash-hint output.
//!
//! This is a small xxHash32-derived mix: callers never need bit-exact
//! compatibility with the reference xxHash32 algorithm, only that the same
//! bytes always produce the same value within one process, and that the
//! seed is fixed so hashes computed by the encoder, the decoder and the
//! static table agree with each other.

/// `0x259a8e6b` (39378473 decimal). Part of this crate's API surface: see
/// the `HASH_NAME`/`HASH_NAMEVAL` decoder options.
pub const HASH_SEED: u32 = 0x259a_8e6b;

const PRIME1: u32 = 0x9E3779B1;
const PRIME2: u32 = 0x85EBCA77;
const PRIME3: u32 = 0xC2B2AE3D;
const PRIME4: u32 = 0x27D4EB2F;
const PRIME5: u32 = 0x16587D45;

/// Hashes a single byte string with the crate's fixed seed.
pub fn hash_bytes(data: &[u8]) -> u32 {
    hash_bytes_seed(data, HASH_SEED)
}

/// Hashes the concatenation of `name` and `value` as if they were one
/// buffer, without actually allocating one.
pub fn hash_nameval(name: &[u8], value: &[u8]) -> u32 {
    let mut h = Xxh32::new(HASH_SEED);
    h.update(name);
    h.update(value);
    h.finish()
}

fn hash_bytes_seed(data: &[u8], seed: u32) -> u32 {
    let mut h = Xxh32::new(seed);
    h.update(data);
    h.finish()
}

/// Streaming xxHash32-style accumulator, seeded with a fixed value for the
/// whole process.
struct Xxh32 {
    total_len: u64,
    seed: u32,
    v: [u32; 4],
    buf: [u8; 16],
    buf_len: usize,
}

impl Xxh32 {
    fn new(seed: u32) -> Self {
        Xxh32 {
            total_len: 0,
            seed,
            v: [
                seed.wrapping_add(PRIME1).wrapping_add(PRIME2),
                seed.wrapping_add(PRIME2),
                seed,
                seed.wrapping_sub(PRIME1),
            ],
            buf: [0; 16],
            buf_len: 0,
        }
    }

    fn update(&mut self, mut data: &[u8]) {
        self.total_len += data.len() as u64;

        if self.buf_len > 0 {
            let need = 16 - self.buf_len;
            let take = need.min(data.len());
            self.buf[self.buf_len..self.buf_len + take].copy_from_slice(&data[..take]);
            self.buf_len += take;
            data = &data[take..];
            if self.buf_len == 16 {
                let lanes = read_lanes(&self.buf);
                self.consume(lanes);
                self.buf_len = 0;
            }
        }

        while data.len() >= 16 {
            let lanes = read_lanes(&data[..16]);
            self.consume(lanes);
            data = &data[16..];
        }

        if !data.is_empty() {
            self.buf[..data.len()].copy_from_slice(data);
            self.buf_len = data.len();
        }
    }

    fn consume(&mut self, lanes: [u32; 4]) {
        for i in 0..4 {
            self.v[i] = round(self.v[i], lanes[i]);
        }
    }

    fn finish(self) -> u32 {
        let mut acc = if self.total_len >= 16 {
            self.v[0]
                .rotate_left(1)
                .wrapping_add(self.v[1].rotate_left(7))
                .wrapping_add(self.v[2].rotate_left(12))
                .wrapping_add(self.v[3].rotate_left(18))
        } else {
            self.seed.wrapping_add(PRIME5)
        };

        acc = acc.wrapping_add(self.total_len as u32);

        let mut rest = &self.buf[..self.buf_len];
        while rest.len() >= 4 {
            let lane = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            acc = acc.wrapping_add(lane.wrapping_mul(PRIME3));
            acc = acc.rotate_left(17).wrapping_mul(PRIME4);
            rest = &rest[4..];
        }
        for &b in rest {
            acc = acc.wrapping_add((b as u32).wrapping_mul(PRIME5));
            acc = acc.rotate_left(11).wrapping_mul(PRIME1);
        }

        acc ^= acc >> 15;
        acc = acc.wrapping_mul(PRIME2);
        acc ^= acc >> 13;
        acc = acc.wrapping_mul(PRIME3);
        acc ^= acc >> 16;
        acc
    }
}

fn read_lanes(chunk: &[u8]) -> [u32; 4] {
    [
        u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
        u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
        u32::from_le_bytes([chunk[8], chunk[9], chunk[10], chunk[11]]),
        u32::from_le_bytes([chunk[12], chunk[13], chunk[14], chunk[15]]),
    ]
}

fn round(acc: u32, lane: u32) -> u32 {
    let acc = acc.wrapping_add(lane.wrapping_mul(PRIME2));
    let acc = acc.rotate_left(13);
    acc.wrapping_mul(PRIME1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn same_bytes_same_hash() {
        assert_eq!(hash_bytes(b":method"), hash_bytes(b":method"));
        assert_ne!(hash_bytes(b":method"), hash_bytes(b":path"));
    }

    #[test]
    fn nameval_matches_manual_concat() {
        let mut combined = Vec::new();
        combined.extend_from_slice(b"content-type");
        combined.extend_from_slice(b"text/html");
        assert_eq!(hash_nameval(b"content-type", b"text/html"), hash_bytes(&combined));
    }

    #[test]
    fn long_input_exercises_the_16_byte_lanes() {
        let data = vec![b'x'; 200];
        // Just needs to not panic and to be stable across calls.
        assert_eq!(hash_bytes(&data), hash_bytes(&data));
    }
}
