// Copyright 2022 - 2023 Wenmeng See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
//
// Author: tickbh

//! A QPACK (RFC 9204) header compression codec: static and dynamic
//! tables, HPACK-derived integer and Huffman coding, and resumable
//! `Encoder`/`Decoder` state machines for turning HTTP header fields
//! into header blocks and back.

#[macro_use]
extern crate bitflags;

mod hash;
mod varint;
mod huffman;
mod static_table;
mod dynamic_table;
mod history;
pub mod encoder;
pub mod decoder;
mod error;
pub mod qif;

pub use decoder::{DecodedField, Decoder, DecoderError, DecoderOpts, HeaderStatus};
pub use dynamic_table::{DynEntry, DynamicTable, TableError};
pub use encoder::{EncodeFlags, EncStatus, Encoder, EncoderError, EncoderOpts};
pub use error::{ErrorInfo, ErrorLocation, QpackError, QpackResult};
pub use huffman::HuffmanError;
pub use static_table::{StaticEntry, STATIC_TABLE_SIZE};
pub use varint::VarintError;
