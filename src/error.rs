// Copyright 2022 - 2023 Wenmeng See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
//
// Author: tickbh

use std::fmt;

use crate::dynamic_table::TableError;
use crate::decoder::DecoderError;
use crate::encoder::EncoderError;
use crate::huffman::HuffmanError;
use crate::varint::VarintError;

/// Where a fatal decode error was detected, for `ErrorInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLocation {
    HeaderBlock,
    EncoderStream,
}

/// Retrievable after a fatal `Error` status, per the error-handling design:
/// location, byte offset and (for header blocks) the stream id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorInfo {
    pub location: ErrorLocation,
    pub offset: u64,
    pub stream_id: u64,
    pub line: u32,
}

/// Crate-wide error, aggregating every component's own error enum. Most of
/// the codec's public operations return a component-specific status enum
/// instead (`EncStatus`, `DecStatus`, ...); this type exists for callers
/// that want to convert any of those into one `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpackError {
    Varint(VarintError),
    Huffman(HuffmanError),
    Table(TableError),
    Encoder(EncoderError),
    Decoder(DecoderError),
}

impl QpackError {
    #[inline]
    fn description_str(&self) -> &'static str {
        match self {
            QpackError::Varint(e) => e.description_str(),
            QpackError::Huffman(e) => e.description_str(),
            QpackError::Table(e) => e.description_str(),
            QpackError::Encoder(e) => e.description_str(),
            QpackError::Decoder(e) => e.description_str(),
        }
    }
}

impl fmt::Display for QpackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description_str())
    }
}

impl From<VarintError> for QpackError {
    fn from(e: VarintError) -> Self {
        QpackError::Varint(e)
    }
}

impl From<HuffmanError> for QpackError {
    fn from(e: HuffmanError) -> Self {
        QpackError::Huffman(e)
    }
}

impl From<TableError> for QpackError {
    fn from(e: TableError) -> Self {
        QpackError::Table(e)
    }
}

impl From<EncoderError> for QpackError {
    fn from(e: EncoderError) -> Self {
        QpackError::Encoder(e)
    }
}

impl From<DecoderError> for QpackError {
    fn from(e: DecoderError) -> Self {
        QpackError::Decoder(e)
    }
}

pub type QpackResult<T> = Result<T, QpackError>;
