//! The QPACK encoder: turns a list of (name, value) header fields into a
//! header block plus, as a side effect, encoder-stream bytes that grow the
//! dynamic table. One `Encoder` serves one QUIC connection; one header
//! block corresponds to one HTTP message.
//!
//! For each field, the encoder decides whether to reference the static
//! table, reference an existing dynamic-table entry, insert a new entry
//! and reference it, or fall back to a literal, subject to a per-connection
//! budget on how many streams may have unacknowledged ("at risk")
//! references outstanding at once.

use std::collections::HashSet;
use std::fmt;

use log::{debug, trace};

use crate::dynamic_table::{entry_size, DynamicTable, TableError};
use crate::error::{ErrorInfo, ErrorLocation};
use crate::hash::{hash_bytes, hash_nameval};
use crate::history::History;
use crate::varint::{self, IntegerDecoder, VarintError, MAX_ENCODED_LEN};
use crate::{huffman, static_table};

bitflags! {
    /// Connection-wide encoder options, chosen once at construction.
    pub struct EncoderOpts: u32 {
        /// Never duplicate a near-eviction entry; always re-insert instead.
        const NO_DUP = 0b0001;
        /// Treat every "seen once" header as "seen twice": index
        /// aggressively instead of waiting for a repeat.
        const IX_AGGR = 0b0010;
        /// Disable the memory guard that reserves headroom for future
        /// insertions.
        const NO_MEM_GUARD = 0b0100;
    }
}

bitflags! {
    /// Per-field flags passed to [`Encoder::encode`].
    pub struct EncodeFlags: u32 {
        /// Do not insert this field into the dynamic table.
        const NO_INDEX = 0b0001;
        /// Sensitive value: always emit a literal, with the `N` bit set,
        /// never index. Implies `NO_INDEX`.
        const NEVER_INDEX = 0b0010;
        /// Do not consult or create dynamic table entries at all for this
        /// field (literal, with at most a static name reference).
        const NO_DYN = 0b0100;
        /// Do not update the encoder's history with this field's
        /// fingerprints.
        const NO_HIST_UPD = 0b1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncStatus {
    /// One field's worth of bytes were appended to both buffers.
    Ok,
    /// `enc_buf` had no room; neither buffer was advanced.
    NobufEnc,
    /// `hdr_buf` had no room; neither buffer was advanced.
    NobufHead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderError {
    /// `start_header` called while a header block is already open.
    AlreadyOpen,
    /// `encode`/`end_header`/`cancel_header` called with no header block
    /// open.
    NoHeaderOpen,
    /// A previous call returned a fatal error; the encoder must be
    /// discarded.
    Poisoned,
    Table(TableError),
    Varint(VarintError),
    /// A decoder-stream instruction used an opcode this encoder doesn't
    /// recognize.
    UnknownDecoderOpcode,
    /// Section Acknowledgement named a stream with no outstanding header
    /// block.
    AckUnknownStream,
    /// Insert Count Increment would push `max_acked_id` past the current
    /// insert count.
    OverAck,
}

impl EncoderError {
    pub(crate) fn description_str(&self) -> &'static str {
        match self {
            EncoderError::AlreadyOpen => "a header block is already open on this encoder",
            EncoderError::NoHeaderOpen => "no header block is open on this encoder",
            EncoderError::Poisoned => "encoder is poisoned by a previous fatal error",
            EncoderError::Table(e) => e.description_str(),
            EncoderError::Varint(e) => e.description_str(),
            EncoderError::UnknownDecoderOpcode => "unrecognized decoder stream instruction",
            EncoderError::AckUnknownStream => "section acknowledgement for a stream with no outstanding header block",
            EncoderError::OverAck => "insert count increment exceeds the current insert count",
        }
    }
}

impl fmt::Display for EncoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description_str())
    }
}

impl From<TableError> for EncoderError {
    fn from(e: TableError) -> Self {
        EncoderError::Table(e)
    }
}

impl From<VarintError> for EncoderError {
    fn from(e: VarintError) -> Self {
        EncoderError::Varint(e)
    }
}

/// Bookkeeping for one header block between `start_header` and its
/// Section Acknowledgement (or Stream Cancellation).
#[derive(Debug, Clone)]
struct HeaderInfo {
    stream_id: u64,
    /// Dynamic table insert count frozen at `start_header` time; this is
    /// the block's Base.
    base_idx: u64,
    /// Smallest absolute id referenced so far, if any.
    min_ref: Option<u64>,
    /// Largest absolute id referenced so far, if any; doubles as the
    /// Required Insert Count.
    max_ref: Option<u64>,
    /// True if any reference in this block is to an entry not yet
    /// acknowledged by the peer.
    at_risk: bool,
    /// Every abs id incref'd on behalf of this block (with repeats),
    /// released on ack or cancellation.
    refs: Vec<u64>,
}

impl HeaderInfo {
    fn new(stream_id: u64, base_idx: u64) -> Self {
        HeaderInfo { stream_id, base_idx, min_ref: None, max_ref: None, at_risk: false, refs: Vec::new() }
    }

    fn note_ref(&mut self, abs_id: u64, at_risk: bool) {
        self.min_ref = Some(self.min_ref.map_or(abs_id, |m| m.min(abs_id)));
        self.max_ref = Some(self.max_ref.map_or(abs_id, |m| m.max(abs_id)));
        self.at_risk |= at_risk;
        self.refs.push(abs_id);
    }
}

/// Decoder-stream instruction opcodes, as distinguished by the top bits of
/// the first byte (RFC 9204 Section 4.4).
#[derive(Debug, Clone, Copy)]
enum DecStreamOpcode {
    SectionAck,
    StreamCancellation,
    InsertCountIncrement,
}

#[derive(Debug, Clone)]
struct DecStreamParser {
    pending: Option<DecStreamOpcode>,
    int_dec: IntegerDecoder,
}

impl DecStreamParser {
    fn new() -> Self {
        DecStreamParser { pending: None, int_dec: IntegerDecoder::new(7) }
    }
}

pub struct Encoder {
    dyn_table: DynamicTable,
    history: History,
    opts: EncoderOpts,
    max_risked_streams: u32,
    cur_streams_at_risk: HashSet<u64>,
    max_acked_id: u64,
    cur_header: Option<HeaderInfo>,
    /// Header blocks sent but not yet acknowledged or cancelled, oldest
    /// first (Section Acknowledgement always targets the oldest
    /// outstanding block for its stream).
    outstanding: Vec<HeaderInfo>,
    dec_parser: DecStreamParser,
    bytes_in: u64,
    bytes_out: u64,
    poisoned: bool,
    last_error: Option<ErrorInfo>,
}

impl Encoder {
    /// Builds a new encoder and writes any encoder-stream bytes needed to
    /// announce the initial dynamic table capacity into `dec_buf`.
    /// Returns the number of bytes written.
    pub fn new(
        max_table_size: usize,
        dyn_table_size: usize,
        max_risked_streams: u32,
        opts: EncoderOpts,
        dec_buf: &mut [u8],
    ) -> Result<(Self, usize), EncoderError> {
        let dyn_table_size = dyn_table_size.min(max_table_size);
        let mut enc = Encoder {
            dyn_table: DynamicTable::with_capacity(max_table_size, 0),
            history: History::new(),
            opts,
            max_risked_streams,
            cur_streams_at_risk: HashSet::new(),
            max_acked_id: 0,
            cur_header: None,
            outstanding: Vec::new(),
            dec_parser: DecStreamParser::new(),
            bytes_in: 0,
            bytes_out: 0,
            poisoned: false,
            last_error: None,
        };

        let mut n = 0;
        if dyn_table_size > 0 {
            let mut buf = Vec::new();
            emit_set_capacity(&mut buf, dyn_table_size as u64);
            if buf.len() > dec_buf.len() {
                return Err(EncoderError::Table(TableError::TableFull));
            }
            dec_buf[..buf.len()].copy_from_slice(&buf);
            n = buf.len();
            enc.dyn_table.set_capacity(dyn_table_size).map_err(EncoderError::Table)?;
        }
        Ok((enc, n))
    }

    /// Ratio of header-block bytes in to header-block-plus-encoder-stream
    /// bytes out, a rough measure of compression effectiveness.
    pub fn ratio(&self) -> f32 {
        if self.bytes_in == 0 {
            0.0
        } else {
            self.bytes_out as f32 / self.bytes_in as f32
        }
    }

    /// Records a fatal error and poisons the encoder; retrievable via
    /// [`Encoder::last_error`].
    fn poison(&mut self, location: ErrorLocation, stream_id: u64, offset: u64, line: u32) {
        self.poisoned = true;
        self.last_error = Some(ErrorInfo { location, offset, stream_id, line });
    }

    /// Returns the location, stream id and source line of the last fatal
    /// error, if this encoder has been poisoned by one.
    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.last_error
    }

    /// Upper bound on the size of a header block's Required Insert Count
    /// plus Sign-and-Delta-Base prefix.
    pub const fn header_data_prefix_size() -> usize {
        2 * MAX_ENCODED_LEN
    }

    pub fn start_header(&mut self, stream_id: u64) -> Result<(), EncoderError> {
        if self.poisoned {
            return Err(EncoderError::Poisoned);
        }
        if self.cur_header.is_some() {
            return Err(EncoderError::AlreadyOpen);
        }
        self.cur_header = Some(HeaderInfo::new(stream_id, self.dyn_table.insert_count()));
        Ok(())
    }

    fn would_allow_new_risk(&self, stream_id: u64) -> bool {
        self.cur_streams_at_risk.contains(&stream_id)
            || (self.cur_streams_at_risk.len() as u32) < self.max_risked_streams
    }

    /// Registers that `abs_id` is about to be referenced on behalf of
    /// `stream_id`. Returns `false` (without side effects) if doing so
    /// would exceed the risked-stream budget.
    fn try_reference(&mut self, stream_id: u64, abs_id: u64) -> bool {
        let at_risk = abs_id > self.max_acked_id;
        if at_risk && !self.would_allow_new_risk(stream_id) {
            return false;
        }
        if at_risk {
            self.cur_streams_at_risk.insert(stream_id);
        }
        self.dyn_table.incref(abs_id);
        true
    }

    /// Encodes one header field, appending at most one instruction to
    /// `enc_buf`/`*enc_len` (encoder stream) and exactly one representation
    /// to `hdr_buf`/`*hdr_len` (header block body). On `NobufEnc` or
    /// `NobufHead` neither buffer, nor any encoder state, is advanced: a
    /// snapshot is taken up front and restored before returning.
    pub fn encode(
        &mut self,
        enc_buf: &mut [u8],
        enc_len: &mut usize,
        hdr_buf: &mut [u8],
        hdr_len: &mut usize,
        name: &[u8],
        value: &[u8],
        flags: EncodeFlags,
    ) -> Result<EncStatus, EncoderError> {
        if self.poisoned {
            return Err(EncoderError::Poisoned);
        }
        if self.cur_header.is_none() {
            return Err(EncoderError::NoHeaderOpen);
        }

        let table_snapshot = self.dyn_table.clone();
        let history_snapshot = self.history.clone();
        let hinfo_snapshot = self.cur_header.clone();
        let risk_snapshot = self.cur_streams_at_risk.clone();

        let mut enc_instr = Vec::new();
        let mut hdr_body = Vec::new();

        match self.encode_field(&mut enc_instr, &mut hdr_body, name, value, flags) {
            Ok(()) => {}
            Err(e) => {
                let stream_id = hinfo_snapshot.as_ref().map_or(0, |h| h.stream_id);
                self.dyn_table = table_snapshot;
                self.history = history_snapshot;
                self.cur_header = hinfo_snapshot;
                self.cur_streams_at_risk = risk_snapshot;
                self.poison(ErrorLocation::HeaderBlock, stream_id, 0, line!());
                return Err(e);
            }
        }

        if hdr_body.len() > hdr_buf.len() {
            self.dyn_table = table_snapshot;
            self.history = history_snapshot;
            self.cur_header = hinfo_snapshot;
            self.cur_streams_at_risk = risk_snapshot;
            *hdr_len = 0;
            return Ok(EncStatus::NobufHead);
        }
        if enc_instr.len() > enc_buf.len() {
            self.dyn_table = table_snapshot;
            self.history = history_snapshot;
            self.cur_header = hinfo_snapshot;
            self.cur_streams_at_risk = risk_snapshot;
            *enc_len = 0;
            return Ok(EncStatus::NobufEnc);
        }

        hdr_buf[..hdr_body.len()].copy_from_slice(&hdr_body);
        *hdr_len = hdr_body.len();
        enc_buf[..enc_instr.len()].copy_from_slice(&enc_instr);
        *enc_len = enc_instr.len();
        self.bytes_in += (name.len() + value.len()) as u64;
        self.bytes_out += (hdr_body.len() + enc_instr.len()) as u64;
        Ok(EncStatus::Ok)
    }

    fn encode_field(
        &mut self,
        enc_instr: &mut Vec<u8>,
        hdr_body: &mut Vec<u8>,
        name: &[u8],
        value: &[u8],
        flags: EncodeFlags,
    ) -> Result<(), EncoderError> {
        let stream_id = self.cur_header.as_ref().unwrap().stream_id;
        let base_idx = self.cur_header.as_ref().unwrap().base_idx;
        let no_dyn = flags.contains(EncodeFlags::NO_DYN);
        let never_index = flags.contains(EncodeFlags::NEVER_INDEX);
        let no_index = flags.contains(EncodeFlags::NO_INDEX) || never_index;
        let no_hist_upd = flags.contains(EncodeFlags::NO_HIST_UPD);

        let name_hash = hash_bytes(name);
        let nameval_hash = hash_nameval(name, value);

        // Steps 1-2: an exact (name, value) match can be referenced
        // as-is, unless the field must always be a literal.
        if !never_index {
            if !no_dyn {
                if let Some(abs_id) = self.dyn_table.find_nameval(nameval_hash, name, value) {
                    if self.try_reference(stream_id, abs_id) {
                        self.emit_indexed_dynamic(hdr_body, base_idx, abs_id);
                        self.cur_header.as_mut().unwrap().note_ref(abs_id, abs_id > self.max_acked_id);
                        return Ok(());
                    }
                }
            }
            if let Some(id) = static_table::find_nameval(nameval_hash, name, value) {
                emit_indexed(hdr_body, true, id as u64);
                return Ok(());
            }
        }

        // Step 3: no exact match (or NEVER_INDEX forbids using one).
        // Decide whether this pair is worth promoting into the table.
        // A fresh insertion's abs id is always greater than any id the
        // peer has acknowledged so far, so it is unconditionally at-risk;
        // check the risked-stream budget before committing to it.
        let should_insert = !no_dyn
            && !no_index
            && (self.opts.contains(EncoderOpts::IX_AGGR) || self.history.seen_nameval(nameval_hash))
            && self.insert_admissible(name, value)
            && self.would_allow_new_risk(stream_id);

        if should_insert {
            self.cur_streams_at_risk.insert(stream_id);
            let name_ref = self.choose_name_ref(name_hash, name, no_dyn);
            match name_ref {
                Some(NameRef::Static(id)) => emit_insert_with_name_ref(enc_instr, true, id as u64, value),
                Some(NameRef::Dynamic(abs)) => {
                    let ri = self.dyn_table.insert_count() - abs;
                    emit_insert_with_name_ref(enc_instr, false, ri, value);
                }
                None => emit_insert_without_name_ref(enc_instr, name, value),
            }
            let abs_id = self.dyn_table.insert(name.to_vec(), value.to_vec())?;
            debug!("encoder inserted abs_id={} stream={}", abs_id, stream_id);
            self.try_reference(stream_id, abs_id);
            let at_risk = abs_id > self.max_acked_id;
            self.emit_indexed_dynamic(hdr_body, base_idx, abs_id);
            self.cur_header.as_mut().unwrap().note_ref(abs_id, at_risk);
            if !no_hist_upd {
                self.history.add(name_hash, nameval_hash);
            }
            return Ok(());
        }

        // Else: a plain literal. Prefer a name-only reference (static
        // first, then dynamic, duplicating a near-eviction entry first so
        // the reference it uses outlives the header block).
        if !no_dyn {
            if let Some(abs_id) = self.dyn_table.find_name(name_hash, name) {
                let abs_id = self.maybe_duplicate(enc_instr, abs_id);
                if self.try_reference(stream_id, abs_id) {
                    let at_risk = abs_id > self.max_acked_id;
                    self.emit_literal_dynamic_name(hdr_body, base_idx, abs_id, never_index, value);
                    self.cur_header.as_mut().unwrap().note_ref(abs_id, at_risk);
                    if !no_hist_upd {
                        self.history.add(name_hash, nameval_hash);
                    }
                    return Ok(());
                }
            }
        }
        if let Some(id) = static_table::find_name(name_hash, name) {
            emit_literal_with_name_ref(hdr_body, never_index, true, id as u64, value);
            if !no_hist_upd {
                self.history.add(name_hash, nameval_hash);
            }
            return Ok(());
        }

        emit_literal_without_name_ref(hdr_body, never_index, name, value);
        if !no_hist_upd {
            self.history.add(name_hash, nameval_hash);
        }
        Ok(())
    }

    /// Memory guard: refuses an insertion that would leave less than
    /// `max_pinned_size + new_size` bytes reclaimable, which would risk
    /// deadlocking later insertions behind currently-pinned entries.
    fn insert_admissible(&self, name: &[u8], value: &[u8]) -> bool {
        if self.opts.contains(EncoderOpts::NO_MEM_GUARD) {
            return true;
        }
        let new_size = entry_size(name, value);
        let free = self.dyn_table.capacity().saturating_sub(self.dyn_table.current_size());
        let reclaimable = free + self.dyn_table.evictable_size();
        let required = self.dyn_table.max_pinned_size() + new_size;
        reclaimable >= required
    }

    /// If `abs_id` names the table's single oldest entry, duplicates it
    /// (unless `NO_DUP`) so referencing it doesn't pin an entry that's
    /// about to be evicted out from under an in-flight header block.
    /// Returns the abs id to actually reference.
    fn maybe_duplicate(&mut self, enc_instr: &mut Vec<u8>, abs_id: u64) -> u64 {
        if self.opts.contains(EncoderOpts::NO_DUP) {
            return abs_id;
        }
        if abs_id != self.dyn_table.del_count() + 1 {
            return abs_id;
        }
        let ri = self.dyn_table.insert_count() - abs_id;
        match self.dyn_table.duplicate(abs_id) {
            Ok(new_id) => {
                emit_duplicate(enc_instr, ri);
                new_id
            }
            Err(_) => abs_id,
        }
    }

    fn choose_name_ref(&self, name_hash: u32, name: &[u8], no_dyn: bool) -> Option<NameRef> {
        if let Some(id) = static_table::find_name(name_hash, name) {
            return Some(NameRef::Static(id));
        }
        if !no_dyn {
            if let Some(abs) = self.dyn_table.find_name(name_hash, name) {
                return Some(NameRef::Dynamic(abs));
            }
        }
        None
    }

    fn emit_indexed_dynamic(&self, hdr_body: &mut Vec<u8>, base_idx: u64, abs_id: u64) {
        if abs_id <= base_idx {
            emit_indexed(hdr_body, false, base_idx - abs_id);
        } else {
            emit_indexed_post_base(hdr_body, abs_id - base_idx - 1);
        }
    }

    fn emit_literal_dynamic_name(
        &self,
        hdr_body: &mut Vec<u8>,
        base_idx: u64,
        abs_id: u64,
        never_index: bool,
        value: &[u8],
    ) {
        if abs_id <= base_idx {
            emit_literal_with_name_ref(hdr_body, never_index, false, base_idx - abs_id, value);
        } else {
            emit_literal_post_base_name_ref(hdr_body, never_index, abs_id - base_idx - 1, value);
        }
    }

    /// Closes the currently open header block, writing the Header Data
    /// Prefix (Required Insert Count + Sign-and-Delta-Base) into
    /// `hdr_buf`. The block moves into the outstanding set, awaiting a
    /// Section Acknowledgement or Stream Cancellation.
    pub fn end_header(&mut self, hdr_buf: &mut [u8], hdr_len: &mut usize) -> Result<(), EncoderError> {
        if self.poisoned {
            return Err(EncoderError::Poisoned);
        }
        let hinfo = self.cur_header.take().ok_or(EncoderError::NoHeaderOpen)?;

        let (ric, base) = match hinfo.max_ref {
            Some(max_ref) => (max_ref, hinfo.base_idx),
            None => (0, 0),
        };
        let max_entries = self.dyn_table.max_entries().max(1);
        let encoded_ric = if ric == 0 { 0 } else { (ric % (2 * max_entries)) + 1 };

        let mut prefix = Vec::new();
        push_varint(&mut prefix, 0x00, encoded_ric, 8);
        if base >= ric {
            push_varint(&mut prefix, 0x00, base - ric, 7);
        } else {
            push_varint(&mut prefix, 0x80, ric - base - 1, 7);
        }

        if prefix.len() > hdr_buf.len() {
            self.cur_header = Some(hinfo);
            return Err(EncoderError::Table(TableError::TableFull));
        }
        hdr_buf[..prefix.len()].copy_from_slice(&prefix);
        *hdr_len = prefix.len();

        trace!(
            "encoder closed header stream={} ric={} base={} at_risk={}",
            hinfo.stream_id, ric, base, hinfo.at_risk
        );
        // A block with no dynamic references will never be acknowledged
        // or cancelled (RFC 9204 Section 4.4.1); nothing to track.
        if hinfo.max_ref.is_some() {
            self.outstanding.push(hinfo);
        }
        Ok(())
    }

    /// Abandons the currently open header block, releasing every
    /// reference it had taken so far.
    pub fn cancel_header(&mut self) -> Result<(), EncoderError> {
        let hinfo = self.cur_header.take().ok_or(EncoderError::NoHeaderOpen)?;
        for abs_id in hinfo.refs {
            self.dyn_table.decref(abs_id);
        }
        Ok(())
    }

    /// Feeds bytes read from the decoder stream, applying Section
    /// Acknowledgement, Stream Cancellation and Insert Count Increment
    /// instructions as they complete. Resumable across arbitrary chunk
    /// boundaries.
    pub fn decoder_in(&mut self, bytes: &[u8]) -> Result<(), EncoderError> {
        if self.poisoned {
            return Err(EncoderError::Poisoned);
        }
        let mut pos = 0;
        while pos < bytes.len() {
            if self.dec_parser.pending.is_none() {
                let b = bytes[pos];
                let (opcode, prefix_bits) = if b & 0x80 != 0 {
                    (DecStreamOpcode::SectionAck, 7)
                } else if b & 0x40 != 0 {
                    (DecStreamOpcode::StreamCancellation, 6)
                } else {
                    (DecStreamOpcode::InsertCountIncrement, 6)
                };
                self.dec_parser.pending = Some(opcode);
                self.dec_parser.int_dec = IntegerDecoder::new(prefix_bits);
            }

            let mut consumed = 0;
            match self.dec_parser.int_dec.decode(&bytes[pos..], &mut consumed) {
                Ok(Some(value)) => {
                    pos += consumed;
                    let opcode = self.dec_parser.pending.take().unwrap();
                    if let Err(e) = self.apply_dec_instruction(opcode, value) {
                        self.poison(ErrorLocation::EncoderStream, 0, pos as u64, line!());
                        return Err(e);
                    }
                }
                Ok(None) => {
                    pos += consumed;
                    break;
                }
                Err(e) => {
                    self.poison(ErrorLocation::EncoderStream, 0, pos as u64, line!());
                    return Err(EncoderError::Varint(e));
                }
            }
        }
        Ok(())
    }

    fn apply_dec_instruction(&mut self, opcode: DecStreamOpcode, value: u64) -> Result<(), EncoderError> {
        match opcode {
            DecStreamOpcode::SectionAck => {
                let stream_id = value;
                let idx = self
                    .outstanding
                    .iter()
                    .position(|h| h.stream_id == stream_id)
                    .ok_or(EncoderError::AckUnknownStream)?;
                let hinfo = self.outstanding.remove(idx);
                if let Some(max_ref) = hinfo.max_ref {
                    self.max_acked_id = self.max_acked_id.max(max_ref);
                }
                for abs_id in hinfo.refs {
                    self.dyn_table.decref(abs_id);
                }
                self.recompute_at_risk();
            }
            DecStreamOpcode::StreamCancellation => {
                let stream_id = value;
                let mut i = 0;
                while i < self.outstanding.len() {
                    if self.outstanding[i].stream_id == stream_id {
                        let hinfo = self.outstanding.remove(i);
                        for abs_id in hinfo.refs {
                            self.dyn_table.decref(abs_id);
                        }
                    } else {
                        i += 1;
                    }
                }
                self.cur_streams_at_risk.remove(&stream_id);
            }
            DecStreamOpcode::InsertCountIncrement => {
                let new_acked = self.max_acked_id + value;
                if new_acked > self.dyn_table.insert_count() {
                    return Err(EncoderError::OverAck);
                }
                self.max_acked_id = new_acked;
                self.recompute_at_risk();
            }
        }
        Ok(())
    }

    fn recompute_at_risk(&mut self) {
        self.cur_streams_at_risk = self
            .outstanding
            .iter()
            .filter(|h| h.max_ref.map_or(false, |m| m > self.max_acked_id))
            .map(|h| h.stream_id)
            .collect();
    }

    pub fn dyn_table(&self) -> &DynamicTable {
        &self.dyn_table
    }
}

enum NameRef {
    Static(u32),
    Dynamic(u64),
}

fn push_varint(dst: &mut Vec<u8>, top_bits: u8, value: u64, prefix_bits: u8) {
    let idx = dst.len();
    dst.push(top_bits);
    let mut buf = [0u8; MAX_ENCODED_LEN];
    let n = varint::encode(&mut buf, value, prefix_bits).expect("MAX_ENCODED_LEN fits any u64");
    dst[idx] |= buf[0];
    dst.extend_from_slice(&buf[1..n]);
}

/// Writes an `H`-bit + 7-bit-prefix length, followed by `s` itself
/// (Huffman-encoded if that's shorter than the raw bytes).
fn write_string(dst: &mut Vec<u8>, s: &[u8]) {
    let huff_len = huffman::encoded_len(s);
    if huff_len < s.len() {
        push_varint(dst, 0x80, huff_len as u64, 7);
        let mut buf = vec![0u8; huff_len];
        huffman::encode(&mut buf, s).expect("encoded_len is exact");
        dst.extend_from_slice(&buf);
    } else {
        push_varint(dst, 0x00, s.len() as u64, 7);
        dst.extend_from_slice(s);
    }
}

// --- Encoder-stream instructions (RFC 9204 Section 4.3) ---

fn emit_set_capacity(dst: &mut Vec<u8>, new_cap: u64) {
    push_varint(dst, 0x20, new_cap, 5);
}

fn emit_insert_with_name_ref(dst: &mut Vec<u8>, is_static: bool, name_index: u64, value: &[u8]) {
    push_varint(dst, 0x80 | if is_static { 0x40 } else { 0 }, name_index, 6);
    write_string(dst, value);
}

fn emit_insert_without_name_ref(dst: &mut Vec<u8>, name: &[u8], value: &[u8]) {
    let huff_len = huffman::encoded_len(name);
    let use_huff = huff_len < name.len();
    push_varint(dst, 0x40 | if use_huff { 0x20 } else { 0 }, if use_huff { huff_len as u64 } else { name.len() as u64 }, 5);
    if use_huff {
        let mut buf = vec![0u8; huff_len];
        huffman::encode(&mut buf, name).expect("encoded_len is exact");
        dst.extend_from_slice(&buf);
    } else {
        dst.extend_from_slice(name);
    }
    write_string(dst, value);
}

fn emit_duplicate(dst: &mut Vec<u8>, ri: u64) {
    push_varint(dst, 0x00, ri, 5);
}

// --- Header block body instructions (RFC 9204 Section 4.5) ---

fn emit_indexed(dst: &mut Vec<u8>, is_static: bool, index: u64) {
    push_varint(dst, 0x80 | if is_static { 0x40 } else { 0 }, index, 6);
}

fn emit_indexed_post_base(dst: &mut Vec<u8>, pbi: u64) {
    push_varint(dst, 0x10, pbi, 4);
}

fn emit_literal_with_name_ref(dst: &mut Vec<u8>, never_index: bool, is_static: bool, index: u64, value: &[u8]) {
    let top = 0x40 | if never_index { 0x20 } else { 0 } | if is_static { 0x10 } else { 0 };
    push_varint(dst, top, index, 4);
    write_string(dst, value);
}

fn emit_literal_post_base_name_ref(dst: &mut Vec<u8>, never_index: bool, pbi: u64, value: &[u8]) {
    let top = if never_index { 0x08 } else { 0 };
    push_varint(dst, top, pbi, 3);
    write_string(dst, value);
}

fn emit_literal_without_name_ref(dst: &mut Vec<u8>, never_index: bool, name: &[u8], value: &[u8]) {
    let huff_len = huffman::encoded_len(name);
    let use_huff = huff_len < name.len();
    let top = 0x20 | if never_index { 0x10 } else { 0 } | if use_huff { 0x08 } else { 0 };
    push_varint(dst, top, if use_huff { huff_len as u64 } else { name.len() as u64 }, 3);
    if use_huff {
        let mut buf = vec![0u8; huff_len];
        huffman::encode(&mut buf, name).expect("encoded_len is exact");
        dst.extend_from_slice(&buf);
    } else {
        dst.extend_from_slice(name);
    }
    write_string(dst, value);
}

#[cfg(test)]
mod test {
    use super::*;

    fn new_encoder() -> Encoder {
        let mut dec_buf = [0u8; 32];
        Encoder::new(4096, 0, 10, EncoderOpts::empty(), &mut dec_buf).unwrap().0
    }

    fn encode_one(enc: &mut Encoder, stream_id: u64, name: &[u8], value: &[u8], flags: EncodeFlags) -> (Vec<u8>, Vec<u8>) {
        enc.start_header(stream_id).unwrap();
        let mut enc_buf = [0u8; 256];
        let mut enc_len = 0;
        let mut hdr_buf = [0u8; 256];
        let mut hdr_len = 0;
        let status = enc.encode(&mut enc_buf, &mut enc_len, &mut hdr_buf, &mut hdr_len, name, value, flags).unwrap();
        assert_eq!(status, EncStatus::Ok);
        let mut prefix_buf = [0u8; 256];
        let mut prefix_len = 0;
        enc.end_header(&mut prefix_buf, &mut prefix_len).unwrap();
        let mut full_hdr = prefix_buf[..prefix_len].to_vec();
        full_hdr.extend_from_slice(&hdr_buf[..hdr_len]);
        (enc_buf[..enc_len].to_vec(), full_hdr)
    }

    #[test]
    fn indexed_static_reference_for_method_get() {
        // `:method: GET` has an exact static-table match (id 17), so it
        // should emit a bare Indexed reference with no dynamic insertion
        // and a zeroed data prefix: `00 00 D1`.
        let mut enc = new_encoder();
        let (enc_bytes, hdr) = encode_one(&mut enc, 0, b":method", b"GET", EncodeFlags::empty());
        assert!(enc_bytes.is_empty());
        assert_eq!(hdr, vec![0x00, 0x00, 0xD1]);
    }

    #[test]
    fn never_index_uses_static_name_literal() {
        let mut enc = new_encoder();
        let (enc_bytes, hdr) = encode_one(&mut enc, 0, b":method", b"method", EncodeFlags::NEVER_INDEX);
        assert!(enc_bytes.is_empty());
        // Literal With Name Reference, N=1, T=1(static), index 15.
        assert_eq!(hdr[2], 0x40 | 0x20 | 0x10 | 0x0F);
    }

    #[test]
    fn repeated_header_gets_inserted_on_second_sighting() {
        let mut enc = new_encoder();
        let (enc1, _) = encode_one(&mut enc, 0, b"x-custom", b"value", EncodeFlags::empty());
        assert!(enc1.is_empty(), "first sighting should not insert");
        let (enc2, hdr2) = encode_one(&mut enc, 1, b"x-custom", b"value", EncodeFlags::empty());
        assert!(!enc2.is_empty(), "second sighting should insert");
        // Indexed dynamic reference, post-base (T=0, post-base marker).
        assert_eq!(hdr2[2] & 0xF0, 0x10);
    }

    #[test]
    fn no_dyn_never_touches_the_table() {
        let mut enc = new_encoder();
        let (enc1, _) = encode_one(&mut enc, 0, b"x-custom", b"value", EncodeFlags::NO_DYN);
        let (enc2, _) = encode_one(&mut enc, 1, b"x-custom", b"value", EncodeFlags::NO_DYN);
        assert!(enc1.is_empty());
        assert!(enc2.is_empty());
        assert_eq!(enc.dyn_table.insert_count(), 0);
    }

    #[test]
    fn risked_stream_budget_falls_back_to_literal() {
        let mut dec_buf = [0u8; 32];
        let mut enc = Encoder::new(4096, 0, 0, EncoderOpts::empty(), &mut dec_buf).unwrap().0;
        // max_risked_streams=0: nothing may ever be referenced unacknowledged.
        let (enc1, _) = encode_one(&mut enc, 0, b"x-custom", b"value", EncodeFlags::empty());
        let (enc2, _) = encode_one(&mut enc, 1, b"x-custom", b"value", EncodeFlags::empty());
        assert!(enc1.is_empty());
        assert!(enc2.is_empty(), "insertion would be at-risk with zero risk budget");
        assert_eq!(enc.dyn_table.insert_count(), 0);
    }

    #[test]
    fn section_ack_releases_references_and_advances_max_acked() {
        let mut enc = new_encoder();
        let _ = encode_one(&mut enc, 0, b"x-custom", b"value", EncodeFlags::empty());
        let (_enc2, _hdr2) = encode_one(&mut enc, 1, b"x-custom", b"value", EncodeFlags::empty());
        assert!(!enc.dyn_table.all_unreferenced());
        // Section Acknowledgement for stream 1 (0x80 | 1).
        enc.decoder_in(&[0x81]).unwrap();
        assert!(enc.dyn_table.all_unreferenced());
        assert_eq!(enc.max_acked_id, 1);
    }

    #[test]
    fn ack_of_unknown_stream_is_an_error() {
        let mut enc = new_encoder();
        assert_eq!(enc.decoder_in(&[0x85]), Err(EncoderError::AckUnknownStream));
    }

    #[test]
    fn fatal_decoder_stream_error_poisons_and_records_last_error() {
        let mut enc = new_encoder();
        // Section Acknowledgement for a stream with no outstanding header block.
        assert_eq!(enc.decoder_in(&[0x85]), Err(EncoderError::AckUnknownStream));
        let info = enc.last_error().expect("fatal error should have recorded ErrorInfo");
        assert_eq!(info.location, ErrorLocation::EncoderStream);

        // The encoder is now poisoned; every further call fails the same way.
        assert_eq!(enc.start_header(0), Err(EncoderError::Poisoned));
    }
}
