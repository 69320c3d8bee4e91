//! Shared Pass-1 decode machinery

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use crate::data::{DispatchTable, InstrumentMap, OpcodeDef, OpcodeSemantic, PercussionMap, SpecialHandler};
use crate::errors::{FormatError, SequenceError};
use crate::ir::{InstrumentContext, IrEvent, IrKind};
use crate::psx::{PsxFormat, PsxHeader};
use crate::snes::{SnesFormat, SnesHeader};
use crate::time::{bpm_from_raw, TickCounter};

use std::fmt::Write;

/// Per-song parameters supplied by the caller.
#[derive(Debug, Clone)]
pub struct SongParams {
    pub song_id: u32,
    pub title: String,
    pub use_alternate_pointers: bool,
}

/// Configuration tables injected per song.
#[derive(Copy, Clone)]
pub struct SongTables<'a> {
    pub dispatch: &'a DispatchTable,
    pub instruments: &'a InstrumentMap,
    pub percussion: Option<&'a PercussionMap>,
}

/// Closed dispatch over the two supported instruction-set families.
pub enum FormatDecoder {
    Psx(PsxFormat),
    Snes(SnesFormat),
}

pub enum Header {
    Psx(PsxHeader),
    Snes(SnesHeader),
}

impl Header {
    /// Per-track start offsets, in voice order.
    pub fn track_offsets(&self) -> Vec<u32> {
        match self {
            Self::Psx(h) => h.track_offsets(),
            Self::Snes(h) => h.track_offsets(),
        }
    }

    pub fn native_ppqn(&self) -> u32 {
        match self {
            Self::Psx(h) => h.native_ppqn(),
            Self::Snes(h) => h.native_ppqn(),
        }
    }
}

impl FormatDecoder {
    pub fn parse_header(&self, data: &[u8], params: &SongParams) -> Result<Header, FormatError> {
        match self {
            Self::Psx(f) => f.parse_header(data, params).map(Header::Psx),
            Self::Snes(f) => f.parse_header(data, params).map(Header::Snes),
        }
    }

    /// Pass-1: single forward scan from `offset` into disassembly + IR.
    pub fn decode_track(
        &self,
        data: &[u8],
        header: &Header,
        offset: u32,
        track_number: u8,
        tables: &SongTables,
        track_boundaries: &[u32],
    ) -> Result<(Vec<String>, Vec<IrEvent>), SequenceError> {
        match (self, header) {
            (Self::Psx(f), Header::Psx(_)) => {
                f.decode_track(data, offset, track_number, tables, track_boundaries)
            }
            (Self::Snes(f), Header::Snes(h)) => {
                f.decode_track(data, h, offset, track_number, tables, track_boundaries)
            }
            _ => Err(SequenceError::TrackOffsetOutOfRange { offset }),
        }
    }
}

/// Forward-only byte cursor over the full sequence data.
///
/// Positions are absolute, so `offset()` is directly usable as branch-target
/// identity.
pub(crate) struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8], start: u32) -> Result<Self, SequenceError> {
        let pos = usize::try_from(start).unwrap_or(usize::MAX);
        if pos >= data.len() {
            return Err(SequenceError::TrackOffsetOutOfRange { offset: start });
        }
        Ok(Self { data, pos })
    }

    pub fn offset(&self) -> u32 {
        self.pos as u32
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let b = self.data.get(self.pos).copied();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    /// Reads the fixed operand bytes of `opcode`, failing on truncation.
    pub fn read_operands(&mut self, offset: u32, opcode: u8, count: u8) -> Result<Vec<u8>, SequenceError> {
        let end = self.pos + usize::from(count);
        if end > self.data.len() {
            return Err(SequenceError::TruncatedOperand {
                offset,
                opcode,
                expected: count,
            });
        }

        let operands = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(operands)
    }
}

/// Note-byte interpretation: a single byte jointly encodes a note class and a
/// duration-table index via div/mod against a small divisor.
pub(crate) struct NoteEncoding {
    pub divisor: u8,
    /// Which half is the class: `true` = quotient, `false` = remainder.
    pub class_is_quotient: bool,
    pub tie_class: u8,
    pub rest_class: u8,
    pub duration_table: &'static [u8],
}

impl NoteEncoding {
    pub fn split(&self, byte: u8) -> (u8, u8) {
        let q = byte / self.divisor;
        let r = byte % self.divisor;

        if self.class_is_quotient {
            (q, r)
        } else {
            (r, q)
        }
    }

    pub fn duration(&self, offset: u32, index: u8) -> Result<TickCounter, SequenceError> {
        match self.duration_table.get(usize::from(index)) {
            Some(&d) => Ok(TickCounter::new(u32::from(d))),
            None => Err(SequenceError::DurationIndexOutOfRange {
                offset,
                index,
                table_len: self.duration_table.len(),
            }),
        }
    }

    /// Builds the IR kind for a decoded note class.
    pub fn note_kind(&self, class: u8, ticks: TickCounter, state: &DecodeState, tables: &SongTables) -> IrKind {
        if class == self.tie_class {
            IrKind::Tie { ticks }
        } else if class == self.rest_class {
            IrKind::Rest { ticks }
        } else if state.percussion {
            // Percussion key lookup is static: bake it into the event.
            let instrument = tables.percussion.and_then(|p| p.get(class));
            IrKind::Note {
                class,
                ticks,
                instrument,
                percussion: true,
            }
        } else {
            IrKind::Note {
                class,
                ticks,
                instrument: state.instrument,
                percussion: false,
            }
        }
    }
}

/// Decode-time state that annotates subsequent Note events.
///
/// Only statically-resolved values live here. The octave is recorded as IR
/// events instead: it can change across loop iterations and is Pass-2
/// runtime state.
#[derive(Default)]
pub(crate) struct DecodeState {
    pub instrument: Option<InstrumentContext>,
    pub percussion: bool,
}

/// What the shared opcode handler decided about control flow.
pub(crate) enum ScanControl {
    Continue,
    /// Halt or Goto: the linear scan for this track is over.
    Stop,
}

/// Builds one IR event from a dispatch-table hit.
///
/// `resolve_target` maps (operand byte offset, operand bytes) to an absolute
/// branch-target offset; the arithmetic is format-specific.
pub(crate) fn event_from_opcode(
    def: &OpcodeDef,
    offset: u32,
    operands: &[u8],
    tempo_factor: f64,
    tables: &SongTables,
    state: &mut DecodeState,
    resolve_target: impl Fn(u32, &[u8]) -> u32,
) -> (IrKind, ScanControl) {
    let value = operand_value(def, operands);

    let kind = match def.semantic {
        OpcodeSemantic::Tempo => IrKind::Tempo {
            bpm: bpm_from_raw(u32::from(value), tempo_factor),
        },
        OpcodeSemantic::TempoFade => IrKind::TempoFade {
            ticks: fade_ticks(def, operands),
            target_bpm: bpm_from_raw(u32::from(value), tempo_factor),
        },
        OpcodeSemantic::PatchChange => {
            state.instrument = tables.instruments.get(value);
            IrKind::PatchChange {
                index: value,
                instrument: state.instrument,
            }
        }
        OpcodeSemantic::OctaveSet => IrKind::OctaveSet { octave: value },
        OpcodeSemantic::OctaveInc => IrKind::OctaveInc,
        OpcodeSemantic::OctaveDec => IrKind::OctaveDec,
        OpcodeSemantic::Volume => IrKind::Volume { value },
        OpcodeSemantic::VolumeFade => IrKind::VolumeFade {
            ticks: fade_ticks(def, operands),
            target: value,
        },
        OpcodeSemantic::Pan => IrKind::Pan { value },
        OpcodeSemantic::PanFade => IrKind::PanFade {
            ticks: fade_ticks(def, operands),
            target: value,
        },
        OpcodeSemantic::SlurOn => IrKind::SlurOn,
        OpcodeSemantic::SlurOff => IrKind::SlurOff,
        OpcodeSemantic::RollOn => IrKind::RollOn,
        OpcodeSemantic::RollOff => IrKind::RollOff,
        OpcodeSemantic::Staccato => IrKind::Staccato {
            percent: value.clamp(1, 100),
        },
        OpcodeSemantic::UtilityDuration => IrKind::UtilityDuration {
            ticks: TickCounter::new(u32::from(value)),
        },
        OpcodeSemantic::MasterVolume => IrKind::MasterVolume { value },
        OpcodeSemantic::VolumeMultiplier => IrKind::VolumeMultiplier { value },
        OpcodeSemantic::PercussionOn => {
            state.percussion = true;
            IrKind::PercussionOn
        }
        OpcodeSemantic::PercussionOff => {
            state.percussion = false;
            IrKind::PercussionOff
        }
        OpcodeSemantic::LoopStart => IrKind::LoopStart {
            count: if def.operands > 0 { value } else { 2 },
        },
        OpcodeSemantic::LoopEnd => IrKind::LoopEnd,
        OpcodeSemantic::LoopBreak => {
            // condition byte, then a target in format encoding
            let condition = operands.first().copied().unwrap_or(1);
            let target = if operands.len() > 1 {
                resolve_target(offset + 2, &operands[1..])
            } else {
                0
            };
            IrKind::LoopBreak { condition, target }
        }
        OpcodeSemantic::LoopMark => IrKind::LoopMark,
        OpcodeSemantic::Goto => {
            let target = resolve_target(offset + 1, operands);
            IrKind::Goto { target }
        }
        OpcodeSemantic::Halt => IrKind::Halt,
        OpcodeSemantic::Envelope => IrKind::Envelope,
        OpcodeSemantic::Nop => IrKind::Nop,
    };

    let control = match kind {
        // A Goto always ends the linear scan; Pass-2 resolves the branch.
        IrKind::Goto { .. } | IrKind::Halt => ScanControl::Stop,
        _ => ScanControl::Continue,
    };

    (kind, control)
}

fn operand_value(def: &OpcodeDef, operands: &[u8]) -> u8 {
    let index = usize::from(def.value_index.unwrap_or(0));
    let v = operands.get(index).copied().unwrap_or(0);

    match def.special {
        Some(SpecialHandler::DoubleValue) => v.saturating_mul(2),
        None => v,
    }
}

/// Fade duration operand: the first operand byte that is not the value operand.
fn fade_ticks(def: &OpcodeDef, operands: &[u8]) -> TickCounter {
    let value_index = usize::from(def.value_index.unwrap_or(0));
    let ticks = operands
        .iter()
        .enumerate()
        .find(|(i, _)| *i != value_index)
        .map(|(_, &b)| b)
        .unwrap_or(0);

    TickCounter::new(u32::from(ticks))
}

/// Human-readable operand column for a disassembly line.
pub(crate) fn event_args(kind: &IrKind) -> String {
    match kind {
        IrKind::Note {
            class,
            ticks,
            percussion,
            ..
        } => {
            if *percussion {
                format!("p{} len={}", class, ticks.value())
            } else {
                format!("{} len={}", class, ticks.value())
            }
        }
        IrKind::Rest { ticks } | IrKind::Tie { ticks } => format!("len={}", ticks.value()),
        IrKind::Tempo { bpm } => format!("{:.1}", bpm),
        IrKind::TempoFade { ticks, target_bpm } => {
            format!("{:.1} over {}", target_bpm, ticks.value())
        }
        IrKind::PatchChange { index, .. } => format!("{}", index),
        IrKind::OctaveSet { octave } => format!("{}", octave),
        IrKind::Volume { value } | IrKind::Pan { value } => format!("{}", value),
        IrKind::VolumeFade { ticks, target } | IrKind::PanFade { ticks, target } => {
            format!("{} over {}", target, ticks.value())
        }
        IrKind::Staccato { percent } => format!("{}%", percent),
        IrKind::UtilityDuration { ticks } => format!("{}", ticks.value()),
        IrKind::MasterVolume { value } | IrKind::VolumeMultiplier { value } => {
            format!("{}", value)
        }
        IrKind::LoopStart { count } => format!("{}", count),
        IrKind::LoopBreak { condition, target } => format!("{} -> {:#06x}", condition, target),
        IrKind::Goto { target } => format!("{:#06x}", target),
        _ => String::new(),
    }
}

/// One disassembly line: address, raw bytes, mnemonic, operands.
pub(crate) fn disasm_line(offset: u32, raw: &[u8], mnemonic: &str, args: &str) -> String {
    let mut hex = String::with_capacity(raw.len() * 3);
    for b in raw {
        let _ = write!(hex, "{:02x} ", b);
    }

    let mut line = format!("{:06x}: {:<12} {}", offset, hex.trim_end(), mnemonic);
    if !args.is_empty() {
        line.push(' ');
        line.push_str(args);
    }
    line
}

pub(crate) fn push_event(
    events: &mut Vec<IrEvent>,
    data: &[u8],
    offset: u32,
    end_offset: u32,
    kind: IrKind,
) {
    let raw = data[offset as usize..end_offset as usize].to_vec();
    events.push(IrEvent { offset, raw, kind });
}
