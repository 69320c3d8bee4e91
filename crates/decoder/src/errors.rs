//! A single location for all of the errors in the decoder

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::fmt::Display;
use std::io;

#[derive(Debug)]
pub enum DeserializeError {
    OpenError(String, io::Error),
    SerdeError(String, serde_json::error::Error),
}

#[derive(Debug)]
pub enum ConfigError {
    UnknownSemantic(String),
    InvalidOpcodeByte(String),
    OperandCountTooLarge(u8),
    ValueIndexOutOfRange(u8, u8),
    EmptyDispatchTable,
    EmptyDurationTable,
}

#[derive(Debug)]
pub enum SourceError {
    ReadPastEndOfSource {
        offset: u64,
        length: usize,
        source_length: u64,
    },
    OpenError(String, io::Error),
}

#[derive(Debug)]
pub enum FormatError {
    HeaderTooShort { length: usize, minimum: usize },
    NoActiveVoices,
    InvalidVoiceCount(usize),
    TrackOffsetOutOfRange { track: u8, offset: u32 },
}

/// Pass-1 malformed sequence data.
///
/// Every variant carries the byte offset of the failing instruction.
#[derive(Debug)]
pub enum SequenceError {
    DurationIndexOutOfRange {
        offset: u32,
        index: u8,
        table_len: usize,
    },
    TruncatedOperand {
        offset: u32,
        opcode: u8,
        expected: u8,
    },
    TruncatedNote {
        offset: u32,
    },
    UnknownOpcode {
        offset: u32,
        opcode: u8,
    },
    TrackOffsetOutOfRange {
        offset: u32,
    },
}

#[derive(Debug)]
pub enum SongError {
    Format(FormatError),
    Source(SourceError),
    NoDecodableTracks,
}

// From Traits
// ===========

impl From<FormatError> for SongError {
    fn from(e: FormatError) -> Self {
        Self::Format(e)
    }
}

impl From<SourceError> for SongError {
    fn from(e: SourceError) -> Self {
        Self::Source(e)
    }
}

// Display
// =======

impl Display for DeserializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenError(filename, e) => write!(f, "Unable to open {}: {}", filename, e),
            Self::SerdeError(filename, e) => write!(f, "Unable to read {}: {}", filename, e),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSemantic(s) => write!(f, "Unknown opcode semantic: {}", s),
            Self::InvalidOpcodeByte(s) => write!(f, "Invalid opcode byte: {}", s),
            Self::OperandCountTooLarge(n) => write!(f, "Operand count too large: {}", n),
            Self::ValueIndexOutOfRange(i, n) => {
                write!(f, "Value operand index {} out of range ({} operands)", i, n)
            }
            Self::EmptyDispatchTable => write!(f, "Dispatch table contains no opcodes"),
            Self::EmptyDurationTable => write!(f, "Duration table is empty"),
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadPastEndOfSource {
                offset,
                length,
                source_length,
            } => write!(
                f,
                "Read past end of source: {} bytes at offset {:#x} (source is {} bytes)",
                length, offset, source_length
            ),
            Self::OpenError(filename, e) => write!(f, "Unable to open {}: {}", filename, e),
        }
    }
}

impl Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HeaderTooShort { length, minimum } => {
                write!(f, "Header too short: {} bytes (minimum {})", length, minimum)
            }
            Self::NoActiveVoices => write!(f, "No active voices in header"),
            Self::InvalidVoiceCount(n) => write!(f, "Invalid voice count: {}", n),
            Self::TrackOffsetOutOfRange { track, offset } => {
                write!(f, "Track {} offset {:#x} out of range", track, offset)
            }
        }
    }
}

impl Display for SequenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DurationIndexOutOfRange {
                offset,
                index,
                table_len,
            } => write!(
                f,
                "{:#06x}: duration index {} out of range (table has {} entries)",
                offset, index, table_len
            ),
            Self::TruncatedOperand {
                offset,
                opcode,
                expected,
            } => write!(
                f,
                "{:#06x}: truncated operand for opcode {:#04x} ({} operand bytes expected)",
                offset, opcode, expected
            ),
            Self::TruncatedNote { offset } => {
                write!(f, "{:#06x}: truncated extended note", offset)
            }
            Self::UnknownOpcode { offset, opcode } => {
                write!(f, "{:#06x}: opcode {:#04x} not in dispatch table", offset, opcode)
            }
            Self::TrackOffsetOutOfRange { offset } => {
                write!(f, "Track start offset {:#x} out of range", offset)
            }
        }
    }
}

impl Display for SongError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Format(e) => e.fmt(f),
            Self::Source(e) => e.fmt(f),
            Self::NoDecodableTracks => write!(f, "No tracks could be decoded"),
        }
    }
}
