//! PSX sequencer format

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use crate::data::{DispatchTable, OpcodeDef, OpcodeSemantic};
use crate::decode::{
    disasm_line, event_args, event_from_opcode, push_event, ByteCursor, DecodeState, NoteEncoding,
    ScanControl, SongParams, SongTables,
};
use crate::errors::{FormatError, SequenceError};
use crate::format_constants::{
    PSX_ALTERNATE_TABLE_OFFSET, PSX_DEFAULT_PPQN, PSX_DURATION_TABLE, PSX_EXT_NOTE_FIRST,
    PSX_EXT_NOTE_LAST, PSX_HEADER_MASK_OFFSET, PSX_HEADER_PPQN_OFFSET, PSX_MIN_HEADER_SIZE,
    PSX_NOTE_DIVISOR, PSX_NOTE_TABLE_THRESHOLD, PSX_PRIMARY_TABLE_OFFSET, PSX_REST_CLASS,
    PSX_TIE_CLASS, PSX_VOICE_COUNT,
};
use crate::ir::IrEvent;
use crate::time::TickCounter;

// Using lower case to match the sequence-engine disassembly in the RE notes.
pub mod opcodes {
    // opcodes 0x00 - 0x6f are table-encoded notes
    // opcodes 0x70 - 0x7d are extended notes (raw duration byte follows)

    pub const VOLUME: u8 = 0x80;
    pub const VOLUME_FADE: u8 = 0x81;
    pub const PAN: u8 = 0x82;
    pub const PAN_FADE: u8 = 0x83;
    pub const PATCH_CHANGE: u8 = 0x84;
    pub const OCTAVE_SET: u8 = 0x85;
    pub const OCTAVE_INC: u8 = 0x86;
    pub const OCTAVE_DEC: u8 = 0x87;

    pub const SLUR_ON: u8 = 0x88;
    pub const SLUR_OFF: u8 = 0x89;
    pub const ROLL_ON: u8 = 0x8a;
    pub const ROLL_OFF: u8 = 0x8b;
    pub const STACCATO: u8 = 0x8c;

    pub const MASTER_VOLUME: u8 = 0x8e;
    pub const VOLUME_MULTIPLIER: u8 = 0x8f;

    pub const ENVELOPE: u8 = 0x90;
    pub const REVERB_DEPTH: u8 = 0x91;

    pub const TEMPO: u8 = 0x94;
    pub const TEMPO_FADE: u8 = 0x95;

    pub const PERCUSSION_ON: u8 = 0x98;
    pub const PERCUSSION_OFF: u8 = 0x99;

    pub const LOOP_START: u8 = 0xa0;
    pub const LOOP_END: u8 = 0xa1;
    pub const LOOP_BREAK: u8 = 0xa2;
    pub const LOOP_MARK: u8 = 0xa3;

    pub const GOTO: u8 = 0xa8;
    pub const HALT: u8 = 0xaf;
}

/// Built-in dispatch table for the PSX sequencer.
///
/// The decode entry points accept any externally-supplied table; this is the
/// configuration shipped with the crate.
pub fn psx_dispatch_table() -> DispatchTable {
    use OpcodeSemantic as S;

    let entries = [
        (opcodes::VOLUME, OpcodeDef::new(S::Volume, 1)),
        (
            opcodes::VOLUME_FADE,
            OpcodeDef::new(S::VolumeFade, 2).with_value_index(1),
        ),
        (opcodes::PAN, OpcodeDef::new(S::Pan, 1)),
        (
            opcodes::PAN_FADE,
            OpcodeDef::new(S::PanFade, 2).with_value_index(1),
        ),
        (opcodes::PATCH_CHANGE, OpcodeDef::new(S::PatchChange, 1)),
        (opcodes::OCTAVE_SET, OpcodeDef::new(S::OctaveSet, 1)),
        (opcodes::OCTAVE_INC, OpcodeDef::new(S::OctaveInc, 0)),
        (opcodes::OCTAVE_DEC, OpcodeDef::new(S::OctaveDec, 0)),
        (opcodes::SLUR_ON, OpcodeDef::new(S::SlurOn, 0)),
        (opcodes::SLUR_OFF, OpcodeDef::new(S::SlurOff, 0)),
        (opcodes::ROLL_ON, OpcodeDef::new(S::RollOn, 0)),
        (opcodes::ROLL_OFF, OpcodeDef::new(S::RollOff, 0)),
        (opcodes::STACCATO, OpcodeDef::new(S::Staccato, 1)),
        (opcodes::MASTER_VOLUME, OpcodeDef::new(S::MasterVolume, 1)),
        (
            opcodes::VOLUME_MULTIPLIER,
            OpcodeDef::new(S::VolumeMultiplier, 1),
        ),
        (opcodes::ENVELOPE, OpcodeDef::new(S::Envelope, 2)),
        // Known opcode, no modeled handler: stays a valid branch target.
        (opcodes::REVERB_DEPTH, OpcodeDef::new(S::Nop, 1)),
        (opcodes::TEMPO, OpcodeDef::new(S::Tempo, 1)),
        (
            opcodes::TEMPO_FADE,
            OpcodeDef::new(S::TempoFade, 2).with_value_index(1),
        ),
        (opcodes::PERCUSSION_ON, OpcodeDef::new(S::PercussionOn, 0)),
        (opcodes::PERCUSSION_OFF, OpcodeDef::new(S::PercussionOff, 0)),
        (opcodes::LOOP_START, OpcodeDef::new(S::LoopStart, 1)),
        (opcodes::LOOP_END, OpcodeDef::new(S::LoopEnd, 0)),
        (opcodes::LOOP_BREAK, OpcodeDef::new(S::LoopBreak, 3)),
        (opcodes::LOOP_MARK, OpcodeDef::new(S::LoopMark, 0)),
        (opcodes::GOTO, OpcodeDef::new(S::Goto, 2)),
        (opcodes::HALT, OpcodeDef::new(S::Halt, 0)),
    ];

    // The built-in table is valid by construction.
    DispatchTable::from_entries(&entries).unwrap()
}

#[derive(Debug, Clone)]
pub struct PsxHeader {
    pub voice_mask: u32,
    native_ppqn: u32,
    /// Start offsets of the active voices, in voice order.
    offsets: Vec<u32>,
}

impl PsxHeader {
    pub fn track_offsets(&self) -> Vec<u32> {
        self.offsets.clone()
    }

    pub fn native_ppqn(&self) -> u32 {
        self.native_ppqn
    }
}

pub struct PsxFormat;

impl PsxFormat {
    pub fn parse_header(&self, data: &[u8], params: &SongParams) -> Result<PsxHeader, FormatError> {
        if data.len() < PSX_MIN_HEADER_SIZE {
            return Err(FormatError::HeaderTooShort {
                length: data.len(),
                minimum: PSX_MIN_HEADER_SIZE,
            });
        }

        let m = PSX_HEADER_MASK_OFFSET;
        let voice_mask = u32::from_le_bytes([data[m], data[m + 1], data[m + 2], data[m + 3]]);
        if voice_mask == 0 {
            return Err(FormatError::NoActiveVoices);
        }

        let p = PSX_HEADER_PPQN_OFFSET;
        let ppqn = u16::from_le_bytes([data[p], data[p + 1]]);
        let native_ppqn = if ppqn == 0 {
            PSX_DEFAULT_PPQN
        } else {
            u32::from(ppqn)
        };

        let table = if params.use_alternate_pointers {
            PSX_ALTERNATE_TABLE_OFFSET
        } else {
            PSX_PRIMARY_TABLE_OFFSET
        };

        let mut offsets = Vec::new();
        for voice in 0..PSX_VOICE_COUNT {
            if voice_mask & (1 << voice) == 0 {
                continue;
            }

            let o = table + voice * 2;
            let ptr = u16::from_le_bytes([data[o], data[o + 1]]);
            offsets.push(u32::from(ptr));
        }

        Ok(PsxHeader {
            voice_mask,
            native_ppqn,
            offsets,
        })
    }

    pub(crate) fn decode_track(
        &self,
        data: &[u8],
        offset: u32,
        track_number: u8,
        tables: &SongTables,
        track_boundaries: &[u32],
    ) -> Result<(Vec<String>, Vec<IrEvent>), SequenceError> {
        let encoding = NoteEncoding {
            divisor: PSX_NOTE_DIVISOR,
            class_is_quotient: true,
            tie_class: PSX_TIE_CLASS,
            rest_class: PSX_REST_CLASS,
            duration_table: &PSX_DURATION_TABLE,
        };

        let mut cursor = ByteCursor::new(data, offset)?;
        let mut events = Vec::new();
        let mut disasm = Vec::new();
        let mut state = DecodeState::default();

        log::debug!("decoding PSX track {} at {:#06x}", track_number, offset);

        loop {
            let at = cursor.offset();
            if cursor.at_end() {
                break;
            }
            if at != offset && track_boundaries.contains(&at) {
                break;
            }

            let byte = match cursor.read_u8() {
                Some(b) => b,
                None => break,
            };

            if byte < PSX_NOTE_TABLE_THRESHOLD {
                let (class, index) = encoding.split(byte);
                let ticks = encoding.duration(at, index)?;
                let kind = encoding.note_kind(class, ticks, &state, tables);

                disasm.push(disasm_line(
                    at,
                    &data[at as usize..cursor.offset() as usize],
                    "note",
                    &event_args(&kind),
                ));
                push_event(&mut events, data, at, cursor.offset(), kind);
            } else if (PSX_EXT_NOTE_FIRST..=PSX_EXT_NOTE_LAST).contains(&byte) {
                // Extended note: raw duration byte instead of a table index.
                let class = byte - PSX_EXT_NOTE_FIRST;
                let duration = cursor
                    .read_u8()
                    .ok_or(SequenceError::TruncatedNote { offset: at })?;
                let ticks = TickCounter::new(u32::from(duration));
                let kind = encoding.note_kind(class, ticks, &state, tables);

                disasm.push(disasm_line(
                    at,
                    &data[at as usize..cursor.offset() as usize],
                    "note_ext",
                    &event_args(&kind),
                ));
                push_event(&mut events, data, at, cursor.offset(), kind);
            } else {
                let def = *tables
                    .dispatch
                    .get(byte)
                    .ok_or(SequenceError::UnknownOpcode { offset: at, opcode: byte })?;

                let operands = cursor.read_operands(at, byte, def.operands)?;
                let (kind, control) = event_from_opcode(
                    &def,
                    at,
                    &operands,
                    1.0,
                    tables,
                    &mut state,
                    psx_target,
                );

                disasm.push(disasm_line(
                    at,
                    &data[at as usize..cursor.offset() as usize],
                    def.semantic.as_str(),
                    &event_args(&kind),
                ));
                push_event(&mut events, data, at, cursor.offset(), kind);

                if let ScanControl::Stop = control {
                    break;
                }
            }
        }

        Ok((disasm, events))
    }
}

/// PSX branch targets: a 16-bit signed displacement relative to the first
/// operand byte.
fn psx_target(operand_offset: u32, bytes: &[u8]) -> u32 {
    let lo = bytes.first().copied().unwrap_or(0);
    let hi = bytes.get(1).copied().unwrap_or(0);
    let displacement = i16::from_le_bytes([lo, hi]);

    let target = i64::from(operand_offset) + i64::from(displacement);
    target.clamp(0, i64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displacement_targets() {
        // Backward: operand byte at 0x20, displacement -0x10
        assert_eq!(psx_target(0x20, &[0xf0, 0xff]), 0x10);
        // Forward
        assert_eq!(psx_target(0x20, &[0x08, 0x00]), 0x28);
        // Clamped at zero rather than wrapping
        assert_eq!(psx_target(0x04, &[0x00, 0xff]), 0);
    }
}
