//! Sequence decoder

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

mod decode;
mod loop_analysis;

pub mod data;
pub mod errors;
pub mod expander;
pub mod format_constants;
pub mod ir;
pub mod psx;
pub mod snes;
pub mod songs;
pub mod source;
pub mod time;

pub use decode::{FormatDecoder, Header, SongParams, SongTables};
pub use loop_analysis::analyze_track;
