//! The QPACK decoder: applies encoder-stream instructions to its dynamic
//! table and turns header blocks back into (name, value) pairs, blocking
//! a header block whose Required Insert Count the table hasn't caught up
//! to yet.
//!
//! Both encoder-stream instructions and header-block bodies are parsed by
//! small resumable sub-state machines so bytes can be fed in from the
//! transport in whatever chunks arrive. A header block that references an
//! insertion the table hasn't seen yet is parked until `enc_in` catches
//! the table up, then delivered through `take_unblocked`.

use std::collections::HashMap;
use std::fmt;

use log::{debug, trace};

use crate::dynamic_table::{DynamicTable, TableError};
use crate::error::{ErrorInfo, ErrorLocation};
use crate::hash::{hash_bytes, hash_nameval};
use crate::huffman::{HuffmanDecoder, HuffmanError};
use crate::static_table;
use crate::varint::{self, IntegerDecoder, VarintError, MAX_ENCODED_LEN};

bitflags! {
    pub struct DecoderOpts: u32 {
        /// Render decoded fields as `name: value\r\n` via
        /// [`render_http1x`] instead of (or alongside) structured access.
        const HTTP1X = 0b001;
        /// Fill `name_hash` on every decoded field.
        const HASH_NAME = 0b010;
        /// Fill `nameval_hash` on every decoded field (implies `HASH_NAME`
        /// in spirit; both are filled if either is set).
        const HASH_NAMEVAL = 0b100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderError {
    Table(TableError),
    Varint(VarintError),
    Huffman(HuffmanError),
    /// An `Indexed`/`Literal ... With Name Reference` named a static id
    /// outside the static table.
    InvalidStaticIndex,
    /// A dynamic reference resolved to an absolute id that has been
    /// evicted, or never existed.
    InvalidDynamicIndex,
    /// Sign + Delta Base produced a Base that underflows the RIC.
    InvalidBase,
    /// More bytes arrived for a header block than its declared total size.
    FrameTooLong,
    /// A header block would block while `max_blocked_streams` is already
    /// saturated; fatal per RFC 9204 Section 2.1.2.
    TooManyBlockedStreams,
    /// A previous call returned a fatal error; the decoder must be
    /// discarded.
    Poisoned,
}

impl DecoderError {
    pub(crate) fn description_str(&self) -> &'static str {
        match self {
            DecoderError::Table(e) => e.description_str(),
            DecoderError::Varint(e) => e.description_str(),
            DecoderError::Huffman(e) => e.description_str(),
            DecoderError::InvalidStaticIndex => "static table index out of range",
            DecoderError::InvalidDynamicIndex => "dynamic table reference is stale or out of range",
            DecoderError::InvalidBase => "sign and delta base underflow the required insert count",
            DecoderError::FrameTooLong => "more bytes delivered than the header block's declared size",
            DecoderError::TooManyBlockedStreams => "blocking this stream would exceed max_blocked_streams",
            DecoderError::Poisoned => "decoder is poisoned by a previous fatal error",
        }
    }
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description_str())
    }
}

impl From<TableError> for DecoderError {
    fn from(e: TableError) -> Self {
        DecoderError::Table(e)
    }
}

impl From<VarintError> for DecoderError {
    fn from(e: VarintError) -> Self {
        DecoderError::Varint(e)
    }
}

impl From<HuffmanError> for DecoderError {
    fn from(e: HuffmanError) -> Self {
        DecoderError::Huffman(e)
    }
}

/// One decoded header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    pub name_hash: Option<u32>,
    pub nameval_hash: Option<u32>,
    /// Set when this field was resolved as a static-table reference.
    pub qpack_index: Option<u32>,
}

fn make_field(name: Vec<u8>, value: Vec<u8>, opts: DecoderOpts, qpack_index: Option<u32>) -> DecodedField {
    let want_hash = opts.intersects(DecoderOpts::HASH_NAME | DecoderOpts::HASH_NAMEVAL);
    let name_hash = if want_hash { Some(hash_bytes(&name)) } else { None };
    let nameval_hash = if opts.contains(DecoderOpts::HASH_NAMEVAL) { Some(hash_nameval(&name, &value)) } else { None };
    DecodedField { name, value, name_hash, nameval_hash, qpack_index }
}

/// Renders decoded fields the way an HTTP/1.x message would, per the
/// `HTTP1X` decoder option.
pub fn render_http1x(fields: &[DecodedField]) -> Vec<u8> {
    let mut out = Vec::new();
    for f in fields {
        out.extend_from_slice(&f.name);
        out.extend_from_slice(b": ");
        out.extend_from_slice(&f.value);
        out.extend_from_slice(b"\r\n");
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderStatus {
    /// More bytes of the same block are needed before it can be parsed.
    Need,
    /// The block's Required Insert Count exceeds the current insert
    /// count; it has been parked and will complete automatically once
    /// `enc_in` catches the table up, surfacing through `take_unblocked`.
    Blocked,
    /// The full header block was available and decoded.
    Done(Vec<DecodedField>),
}

/// Bytes accumulated so far for a header block still being delivered.
#[derive(Debug, Clone)]
struct ReadCtx {
    total_size: usize,
    buf: Vec<u8>,
}

enum ParseOutcome {
    Blocked { required_ric: u64 },
    Done(Vec<DecodedField>, Vec<u64>),
}

/// Reconstructs the Required Insert Count from its modular wire encoding,
/// choosing the representative closest to `insert_count`.
fn decode_ric(encoded: u64, insert_count: u64, max_entries: u64) -> Result<u64, DecoderError> {
    if encoded == 0 {
        return Ok(0);
    }
    if max_entries == 0 {
        return Err(DecoderError::InvalidDynamicIndex);
    }
    let full_range = 2 * max_entries;
    let max_value = insert_count + max_entries;
    let max_wrapped = max_value % full_range;
    let ric = if max_wrapped >= encoded - 1 {
        max_value - max_wrapped + encoded - 1
    } else {
        max_value - full_range + encoded - 1
    };
    Ok(ric)
}

/// Cursor over a fully-buffered header block body.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn has_remaining(&self) -> bool {
        self.pos < self.buf.len()
    }

    fn peek_byte(&self) -> Result<u8, DecoderError> {
        self.buf.get(self.pos).copied().ok_or(DecoderError::Varint(VarintError::Overflow))
    }

    fn read_varint(&mut self, prefix_bits: u8) -> Result<u64, DecoderError> {
        let mut dec = IntegerDecoder::new(prefix_bits);
        let mut consumed = 0;
        let value = dec
            .decode(&self.buf[self.pos..], &mut consumed)?
            .ok_or(DecoderError::Varint(VarintError::Overflow))?;
        self.pos += consumed;
        Ok(value)
    }

    fn read_raw_or_huffman(&mut self, len: u64, huffman_coded: bool) -> Result<Vec<u8>, DecoderError> {
        let len = len as usize;
        if self.buf.len() < self.pos + len {
            return Err(DecoderError::Varint(VarintError::Overflow));
        }
        let raw = &self.buf[self.pos..self.pos + len];
        let out = if huffman_coded { HuffmanDecoder::decode_all(raw)? } else { raw.to_vec() };
        self.pos += len;
        Ok(out)
    }

    fn read_string(&mut self) -> Result<Vec<u8>, DecoderError> {
        let huffman_coded = self.peek_byte()? & 0x80 != 0;
        let len = self.read_varint(7)?;
        self.read_raw_or_huffman(len, huffman_coded)
    }
}

fn parse_block(buf: &[u8], dyn_table: &DynamicTable, opts: DecoderOpts) -> Result<ParseOutcome, DecoderError> {
    let mut r = Reader::new(buf);
    let encoded_ric = r.read_varint(8)?;
    let ric = decode_ric(encoded_ric, dyn_table.insert_count(), dyn_table.max_entries())?;
    if ric > dyn_table.insert_count() {
        return Ok(ParseOutcome::Blocked { required_ric: ric });
    }

    let sign = r.peek_byte()? & 0x80 != 0;
    let delta = r.read_varint(7)?;
    let base = if !sign {
        ric + delta
    } else {
        ric.checked_sub(delta + 1).ok_or(DecoderError::InvalidBase)?
    };

    let mut fields = Vec::new();
    let mut refs = Vec::new();

    while r.has_remaining() {
        let b0 = r.peek_byte()?;
        if b0 & 0x80 != 0 {
            let is_static = b0 & 0x40 != 0;
            let index = r.read_varint(6)?;
            if is_static {
                let e = static_table::get(index as u32).ok_or(DecoderError::InvalidStaticIndex)?;
                fields.push(make_field(e.name.to_vec(), e.value.to_vec(), opts, Some(e.id)));
            } else {
                let abs_id = base.checked_sub(index).ok_or(DecoderError::InvalidDynamicIndex)?;
                let e = dyn_table.lookup_by_abs_id(abs_id).ok_or(DecoderError::InvalidDynamicIndex)?;
                refs.push(abs_id);
                fields.push(make_field(e.name.clone(), e.value.clone(), opts, None));
            }
        } else if b0 & 0x40 != 0 {
            let is_static = b0 & 0x10 != 0;
            let index = r.read_varint(4)?;
            let value = r.read_string()?;
            let name = if is_static {
                static_table::get(index as u32).ok_or(DecoderError::InvalidStaticIndex)?.name.to_vec()
            } else {
                let abs_id = base.checked_sub(index).ok_or(DecoderError::InvalidDynamicIndex)?;
                let e = dyn_table.lookup_by_abs_id(abs_id).ok_or(DecoderError::InvalidDynamicIndex)?;
                refs.push(abs_id);
                e.name.clone()
            };
            fields.push(make_field(name, value, opts, None));
        } else if b0 & 0x20 != 0 {
            let huffman_coded_name = b0 & 0x08 != 0;
            let namelen = r.read_varint(3)?;
            let name = r.read_raw_or_huffman(namelen, huffman_coded_name)?;
            let value = r.read_string()?;
            fields.push(make_field(name, value, opts, None));
        } else if b0 & 0x10 != 0 {
            let pbi = r.read_varint(4)?;
            let abs_id = base.checked_add(1).and_then(|b| b.checked_add(pbi)).ok_or(DecoderError::InvalidDynamicIndex)?;
            let e = dyn_table.lookup_by_abs_id(abs_id).ok_or(DecoderError::InvalidDynamicIndex)?;
            refs.push(abs_id);
            fields.push(make_field(e.name.clone(), e.value.clone(), opts, None));
        } else {
            let pbi = r.read_varint(3)?;
            let value = r.read_string()?;
            let abs_id = base.checked_add(1).and_then(|b| b.checked_add(pbi)).ok_or(DecoderError::InvalidDynamicIndex)?;
            let e = dyn_table.lookup_by_abs_id(abs_id).ok_or(DecoderError::InvalidDynamicIndex)?;
            refs.push(abs_id);
            fields.push(make_field(e.name.clone(), value, opts, None));
        }
    }

    Ok(ParseOutcome::Done(fields, refs))
}

/// One decoded encoder-stream instruction (RFC 9204 Section 4.3).
enum EncStreamInstr {
    SetCapacity(u64),
    InsertWithNameRef { is_static: bool, index: u64, value: Vec<u8> },
    InsertWithoutNameRef { name: Vec<u8>, value: Vec<u8> },
    Duplicate(u64),
}

fn read_varint_partial(buf: &[u8], prefix_bits: u8) -> Result<Option<(u64, usize)>, VarintError> {
    let mut dec = IntegerDecoder::new(prefix_bits);
    let mut consumed = 0;
    match dec.decode(buf, &mut consumed)? {
        Some(v) => Ok(Some((v, consumed))),
        None => Ok(None),
    }
}

fn try_read_string(buf: &[u8]) -> Result<Option<(usize, Vec<u8>)>, DecoderError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let huffman_coded = buf[0] & 0x80 != 0;
    let (len, n) = match read_varint_partial(buf, 7)? {
        Some(x) => x,
        None => return Ok(None),
    };
    let total = n + len as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let raw = &buf[n..total];
    let bytes = if huffman_coded { HuffmanDecoder::decode_all(raw)? } else { raw.to_vec() };
    Ok(Some((total, bytes)))
}

/// Parses at most one encoder-stream instruction from the front of `buf`.
/// Returns `Ok(None)` if `buf` doesn't yet hold a complete instruction.
fn try_parse_one_enc_instruction(buf: &[u8]) -> Result<Option<(usize, EncStreamInstr)>, DecoderError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let b0 = buf[0];
    if b0 & 0x80 != 0 {
        let is_static = b0 & 0x40 != 0;
        let (index, n1) = match read_varint_partial(buf, 6)? {
            Some(x) => x,
            None => return Ok(None),
        };
        let (vn, value) = match try_read_string(&buf[n1..])? {
            Some(x) => x,
            None => return Ok(None),
        };
        Ok(Some((n1 + vn, EncStreamInstr::InsertWithNameRef { is_static, index, value })))
    } else if b0 & 0x40 != 0 {
        let huffman_coded = b0 & 0x20 != 0;
        let (namelen, n1) = match read_varint_partial(buf, 5)? {
            Some(x) => x,
            None => return Ok(None),
        };
        let name_end = n1 + namelen as usize;
        if buf.len() < name_end {
            return Ok(None);
        }
        let name_raw = &buf[n1..name_end];
        let name = if huffman_coded { HuffmanDecoder::decode_all(name_raw)? } else { name_raw.to_vec() };
        let (vn, value) = match try_read_string(&buf[name_end..])? {
            Some(x) => x,
            None => return Ok(None),
        };
        Ok(Some((name_end + vn, EncStreamInstr::InsertWithoutNameRef { name, value })))
    } else if b0 & 0x20 != 0 {
        let (cap, n1) = match read_varint_partial(buf, 5)? {
            Some(x) => x,
            None => return Ok(None),
        };
        Ok(Some((n1, EncStreamInstr::SetCapacity(cap))))
    } else {
        let (ri, n1) = match read_varint_partial(buf, 5)? {
            Some(x) => x,
            None => return Ok(None),
        };
        Ok(Some((n1, EncStreamInstr::Duplicate(ri))))
    }
}

fn push_varint(dst: &mut Vec<u8>, top_bits: u8, value: u64, prefix_bits: u8) {
    let idx = dst.len();
    dst.push(top_bits);
    let mut buf = [0u8; MAX_ENCODED_LEN];
    let n = varint::encode(&mut buf, value, prefix_bits).expect("MAX_ENCODED_LEN fits any u64");
    dst[idx] |= buf[0];
    dst.extend_from_slice(&buf[1..n]);
}

pub struct Decoder {
    dyn_table: DynamicTable,
    opts: DecoderOpts,
    max_blocked_streams: u32,
    contexts: HashMap<u64, ReadCtx>,
    blocked: HashMap<u64, (u64, Vec<u8>)>,
    unblocked_ready: Vec<(u64, Vec<DecodedField>)>,
    enc_buf: Vec<u8>,
    dec_out: Vec<u8>,
    last_reported_insert_count: u64,
    poisoned: bool,
    last_error: Option<ErrorInfo>,
}

impl Decoder {
    pub fn new(max_table_size: usize, max_blocked_streams: u32, opts: DecoderOpts) -> Self {
        Decoder {
            dyn_table: DynamicTable::new(max_table_size),
            opts,
            max_blocked_streams,
            contexts: HashMap::new(),
            blocked: HashMap::new(),
            unblocked_ready: Vec::new(),
            enc_buf: Vec::new(),
            dec_out: Vec::new(),
            last_reported_insert_count: 0,
            poisoned: false,
            last_error: None,
        }
    }

    /// Records a fatal error and poisons the decoder; retrievable via
    /// [`Decoder::last_error`].
    fn poison(&mut self, location: ErrorLocation, stream_id: u64, offset: u64, line: u32) {
        self.poisoned = true;
        self.last_error = Some(ErrorInfo { location, offset, stream_id, line });
    }

    /// Returns the location, stream id and source line of the last fatal
    /// error, if this decoder has been poisoned by one.
    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.last_error
    }

    /// Feeds bytes read from the encoder stream, mutating the dynamic
    /// table and unblocking any header blocks whose Required Insert Count
    /// is now satisfied. Resumable across arbitrary chunk boundaries.
    pub fn enc_in(&mut self, bytes: &[u8]) -> Result<(), DecoderError> {
        if self.poisoned {
            return Err(DecoderError::Poisoned);
        }
        self.enc_buf.extend_from_slice(bytes);
        loop {
            match try_parse_one_enc_instruction(&self.enc_buf) {
                Ok(Some((consumed, instr))) => {
                    if let Err(e) = self.apply_enc_instruction(instr) {
                        let offset = self.enc_buf.len() as u64;
                        self.poison(ErrorLocation::EncoderStream, 0, offset, line!());
                        return Err(e);
                    }
                    self.enc_buf.drain(0..consumed);
                }
                Ok(None) => break,
                Err(e) => {
                    let offset = self.enc_buf.len() as u64;
                    self.poison(ErrorLocation::EncoderStream, 0, offset, line!());
                    return Err(e);
                }
            }
        }

        let insert_count = self.dyn_table.insert_count();
        if insert_count > self.last_reported_insert_count {
            let incr = insert_count - self.last_reported_insert_count;
            push_varint(&mut self.dec_out, 0x00, incr, 6);
            self.last_reported_insert_count = insert_count;
        }

        if let Err(e) = self.wake_blocked() {
            self.poison(ErrorLocation::HeaderBlock, 0, 0, line!());
            return Err(e);
        }
        Ok(())
    }

    fn apply_enc_instruction(&mut self, instr: EncStreamInstr) -> Result<(), DecoderError> {
        match instr {
            EncStreamInstr::SetCapacity(cap) => {
                debug!("decoder set dynamic table capacity to {}", cap);
                self.dyn_table.set_capacity(cap as usize)?;
            }
            EncStreamInstr::InsertWithNameRef { is_static, index, value } => {
                let name = if is_static {
                    static_table::get(index as u32).ok_or(DecoderError::InvalidStaticIndex)?.name.to_vec()
                } else {
                    let abs_id = self.dyn_table.insert_count().checked_sub(index).ok_or(DecoderError::InvalidDynamicIndex)?;
                    self.dyn_table.lookup_by_abs_id(abs_id).ok_or(DecoderError::InvalidDynamicIndex)?.name.clone()
                };
                let abs_id = self.dyn_table.insert(name, value)?;
                debug!("decoder inserted abs_id={}", abs_id);
            }
            EncStreamInstr::InsertWithoutNameRef { name, value } => {
                let abs_id = self.dyn_table.insert(name, value)?;
                debug!("decoder inserted abs_id={}", abs_id);
            }
            EncStreamInstr::Duplicate(ri) => {
                let abs_id = self.dyn_table.insert_count().checked_sub(ri).ok_or(DecoderError::InvalidDynamicIndex)?;
                let new_id = self.dyn_table.duplicate(abs_id)?;
                debug!("decoder duplicated abs_id={} -> {}", abs_id, new_id);
            }
        }
        Ok(())
    }

    fn touch_refs(&mut self, refs: &[u64]) {
        for r in refs {
            self.dyn_table.incref(*r);
        }
        for r in refs {
            self.dyn_table.decref(*r);
        }
    }

    fn wake_blocked(&mut self) -> Result<(), DecoderError> {
        let insert_count = self.dyn_table.insert_count();
        let ready: Vec<u64> = self
            .blocked
            .iter()
            .filter(|(_, (ric, _))| *ric <= insert_count)
            .map(|(id, _)| *id)
            .collect();
        for stream_id in ready {
            let (_, buf) = self.blocked.remove(&stream_id).unwrap();
            match parse_block(&buf, &self.dyn_table, self.opts)? {
                ParseOutcome::Done(fields, refs) => {
                    self.touch_refs(&refs);
                    if !refs.is_empty() {
                        self.queue_section_ack(stream_id);
                    }
                    trace!("decoder unblocked stream={}", stream_id);
                    self.unblocked_ready.push((stream_id, fields));
                }
                ParseOutcome::Blocked { required_ric } => {
                    self.blocked.insert(stream_id, (required_ric, buf));
                }
            }
        }
        Ok(())
    }

    /// Drains header blocks that were blocked and have since become
    /// decodable. Call after every `enc_in`.
    pub fn take_unblocked(&mut self) -> Vec<(u64, Vec<DecodedField>)> {
        std::mem::take(&mut self.unblocked_ready)
    }

    /// Feeds `buf`, the next chunk of `stream_id`'s header block (whose
    /// total size is `total_size`, known from the HTTP/3 frame header).
    pub fn header_in(&mut self, stream_id: u64, total_size: usize, buf: &[u8]) -> Result<HeaderStatus, DecoderError> {
        if self.poisoned {
            return Err(DecoderError::Poisoned);
        }
        let ctx = self.contexts.entry(stream_id).or_insert_with(|| ReadCtx { total_size, buf: Vec::new() });
        ctx.buf.extend_from_slice(buf);
        if ctx.buf.len() > ctx.total_size {
            let offset = ctx.buf.len() as u64;
            self.poison(ErrorLocation::HeaderBlock, stream_id, offset, line!());
            return Err(DecoderError::FrameTooLong);
        }
        if ctx.buf.len() < ctx.total_size {
            return Ok(HeaderStatus::Need);
        }

        let ctx = self.contexts.remove(&stream_id).unwrap();
        match parse_block(&ctx.buf, &self.dyn_table, self.opts) {
            Ok(ParseOutcome::Blocked { required_ric }) => {
                if !self.blocked.contains_key(&stream_id) && self.blocked.len() as u32 >= self.max_blocked_streams {
                    self.poison(ErrorLocation::HeaderBlock, stream_id, 0, line!());
                    return Err(DecoderError::TooManyBlockedStreams);
                }
                self.blocked.insert(stream_id, (required_ric, ctx.buf));
                Ok(HeaderStatus::Blocked)
            }
            Ok(ParseOutcome::Done(fields, refs)) => {
                self.touch_refs(&refs);
                if !refs.is_empty() {
                    self.queue_section_ack(stream_id);
                }
                Ok(HeaderStatus::Done(fields))
            }
            Err(e) => {
                let offset = ctx.buf.len() as u64;
                self.poison(ErrorLocation::HeaderBlock, stream_id, offset, line!());
                Err(e)
            }
        }
    }

    /// Convenience form of `header_in` for the common case where the
    /// whole block already fits in one call.
    pub fn header_read(&mut self, stream_id: u64, buf: &[u8]) -> Result<HeaderStatus, DecoderError> {
        self.header_in(stream_id, buf.len(), buf)
    }

    fn queue_section_ack(&mut self, stream_id: u64) {
        push_varint(&mut self.dec_out, 0x80, stream_id, 7);
    }

    /// Signals that `stream_id` was abandoned (e.g. `RESET_STREAM`),
    /// discarding any in-flight or blocked context for it.
    pub fn cancel_stream(&mut self, stream_id: u64) {
        self.contexts.remove(&stream_id);
        self.blocked.remove(&stream_id);
        push_varint(&mut self.dec_out, 0x40, stream_id, 6);
    }

    /// Drains pending decoder-stream bytes (Section Acknowledgement,
    /// Stream Cancellation, Insert Count Increment) into `buf`. Returns
    /// the number of bytes written.
    pub fn drain_decoder_stream(&mut self, buf: &mut [u8]) -> usize {
        let n = self.dec_out.len().min(buf.len());
        buf[..n].copy_from_slice(&self.dec_out[..n]);
        self.dec_out.drain(0..n);
        n
    }

    /// Releases every outstanding stream reference (blocked and in-flight
    /// contexts) and, in debug builds, asserts that the dynamic table's
    /// refcounts have all dropped to zero. References are only ever held
    /// for the duration of a single synchronous parse pass in this
    /// implementation (never across a `Blocked` wait), so in practice
    /// this assertion simply confirms that invariant held.
    pub fn cleanup(&mut self) {
        self.contexts.clear();
        self.blocked.clear();
        #[cfg(debug_assertions)]
        debug_assert!(self.dyn_table.all_unreferenced(), "decoder cleanup: dynamic table still has outstanding references");
    }

    pub fn dyn_table(&self) -> &DynamicTable {
        &self.dyn_table
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn indexed_static_reference_decodes_method_get() {
        let mut dec = Decoder::new(4096, 10, DecoderOpts::empty());
        let block = [0x00, 0x00, 0xD1];
        let fields = match dec.header_read(0, &block).unwrap() {
            HeaderStatus::Done(fields) => fields,
            status => panic!("expected Done, got {:?}", status),
        };
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, b":method");
        assert_eq!(fields[0].value, b"GET");
        assert_eq!(fields[0].qpack_index, Some(17));
    }

    #[test]
    fn enc_in_is_resumable_across_splits() {
        // Insert Without Name Reference: "x"->"y", both raw (H=0).
        let instr = vec![0x40 | 1, b'x', 1, b'y'];

        for split in 0..=instr.len() {
            let mut dec = Decoder::new(4096, 10, DecoderOpts::empty());
            dec.enc_in(&instr[..split]).unwrap();
            dec.enc_in(&instr[split..]).unwrap();
            assert_eq!(dec.dyn_table.insert_count(), 1);
            assert_eq!(dec.dyn_table.lookup_by_abs_id(1).unwrap().name, b"x");
        }
    }

    #[test]
    fn blocked_block_completes_after_enc_in() {
        let mut dec = Decoder::new(4096, 10, DecoderOpts::empty());
        // RIC encoding for ric=1 with max_entries large: encoded = (1 % (2*max_entries)) + 1 = 2.
        let block = [0x02, 0x00, 0x80]; // Indexed dynamic, T=0, ri=0 (pre-base, abs=base-0=1)
        let status = dec.header_in(1, block.len(), &block).unwrap();
        assert_eq!(status, HeaderStatus::Blocked);
        assert!(dec.take_unblocked().is_empty());

        // Insert Without Name Reference: name="n" value="v", both raw (H=0).
        let instr = vec![0x40 | 1, b'n', 1, b'v'];
        dec.enc_in(&instr).unwrap();

        let unblocked = dec.take_unblocked();
        assert_eq!(unblocked.len(), 1);
        assert_eq!(unblocked[0].0, 1);
        assert_eq!(unblocked[0].1[0].name, b"n");
    }

    #[test]
    fn cleanup_is_idempotent_and_leaves_table_unreferenced() {
        let mut dec = Decoder::new(4096, 10, DecoderOpts::empty());
        let block = [0x00, 0x00, 0xD1];
        let _ = dec.header_read(0, &block).unwrap();
        dec.cleanup();
        assert!(dec.dyn_table.all_unreferenced());
    }

    #[test]
    fn invalid_static_index_poisons_and_records_last_error() {
        let mut dec = Decoder::new(4096, 10, DecoderOpts::empty());
        // Indexed static reference (T=1) to id 150: 6-bit prefix all-ones
        // (0x3F) plus one continuation byte 0x57, i.e. 63 + 87 = 150 --
        // out of the static table's 99-entry range.
        let block = [0x00, 0x00, 0x80 | 0x40 | 0x3F, 0x57];
        assert_eq!(dec.header_read(1, &block), Err(DecoderError::InvalidStaticIndex));
        let info = dec.last_error().expect("fatal error should have recorded ErrorInfo");
        assert_eq!(info.location, ErrorLocation::HeaderBlock);
        assert_eq!(info.stream_id, 1);

        // The decoder is now poisoned; every further call fails the same way.
        assert_eq!(dec.header_read(2, &[0x00, 0x00, 0xD1]), Err(DecoderError::Poisoned));
    }

    #[test]
    fn hash_options_populate_requested_hashes_only() {
        let mut dec = Decoder::new(4096, 10, DecoderOpts::HASH_NAMEVAL);
        let block = [0x00, 0x00, 0xD1];
        let fields = match dec.header_read(0, &block).unwrap() {
            HeaderStatus::Done(fields) => fields,
            status => panic!("expected Done, got {:?}", status),
        };
        assert!(fields[0].name_hash.is_some());
        assert!(fields[0].nameval_hash.is_some());

        let mut dec2 = Decoder::new(4096, 10, DecoderOpts::empty());
        let fields2 = match dec2.header_read(0, &block).unwrap() {
            HeaderStatus::Done(fields) => fields,
            status => panic!("expected Done, got {:?}", status),
        };
        assert!(fields2[0].name_hash.is_none());
        assert!(fields2[0].nameval_hash.is_none());
    }

    #[test]
    fn render_http1x_formats_fields_as_header_lines() {
        let mut dec = Decoder::new(4096, 10, DecoderOpts::HTTP1X);
        let block = [0x00, 0x00, 0xD1];
        let fields = match dec.header_read(0, &block).unwrap() {
            HeaderStatus::Done(fields) => fields,
            status => panic!("expected Done, got {:?}", status),
        };
        assert_eq!(render_http1x(&fields), b":method: GET\r\n");
    }
}
