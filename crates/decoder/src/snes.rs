//! SNES sound-engine sequence family

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Several games ship near-identical sound engines that differ only in
//! opcode layout, note encoding and pointer addressing. One decoder body
//! covers the family; `SnesVariant` carries the differences.

use crate::data::{DispatchTable, OpcodeDef, OpcodeSemantic, SpecialHandler};
use crate::decode::{
    disasm_line, event_args, event_from_opcode, push_event, ByteCursor, DecodeState, NoteEncoding,
    ScanControl, SongParams, SongTables,
};
use crate::errors::{FormatError, SequenceError};
use crate::format_constants::{SNES_DEFAULT_PPQN, SNES_UNUSED_POINTER_THRESHOLD};
use crate::ir::IrEvent;

/// Raw tempo operand to bpm (engine timer constant, shared by the family).
pub const SNES_TEMPO_FACTOR: f64 = 60000.0 / 24576.0;

/// How absolute 16-bit sequence pointers map to file offsets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SnesAddressing {
    /// `offset = pointer - load_address`
    Direct,
    /// `offset = (pointer + vaddr_offset) - load_address`, 16-bit wrapping.
    ///
    /// Later engine revisions relocate songs; the header carries a raw field
    /// from which the per-song correction is derived.
    Corrected,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SnesRevision {
    Rev1,
    Rev2,
    Rev3,
}

/// One engine revision's configuration.
#[derive(Debug, Clone)]
pub struct SnesVariant {
    pub revision: SnesRevision,
    pub name: &'static str,

    /// Bytes below this value are note-encoded.
    pub note_threshold: u8,
    pub divisor: u8,
    pub class_is_quotient: bool,
    pub tie_class: u8,
    pub rest_class: u8,
    pub duration_table: &'static [u8],

    pub addressing: SnesAddressing,
    /// Constant the raw header field is subtracted from (Corrected only).
    pub vaddr_constant: u16,
    /// ARAM address the sequence block is loaded at.
    pub load_address: u16,

    pub voice_count: usize,
    pub native_ppqn: u32,
}

const REV1_DURATIONS: [u8; 15] = [
    0xc0, 0x90, 0x60, 0x48, 0x30, 0x24, 0x18, 0x10, 0x0c, 0x08, 0x06, 0x04, 0x03, 0x02, 0x01,
];

const REV2_DURATIONS: [u8; 13] = [
    0xc0, 0x60, 0x48, 0x30, 0x24, 0x18, 0x10, 0x0c, 0x08, 0x06, 0x04, 0x03, 0x01,
];

impl SnesVariant {
    pub fn rev1() -> Self {
        Self {
            revision: SnesRevision::Rev1,
            name: "rev1",
            note_threshold: 0xd2,
            divisor: 15,
            class_is_quotient: true,
            tie_class: 12,
            rest_class: 13,
            duration_table: &REV1_DURATIONS,
            addressing: SnesAddressing::Direct,
            vaddr_constant: 0,
            load_address: 0x2000,
            voice_count: 8,
            native_ppqn: SNES_DEFAULT_PPQN,
        }
    }

    pub fn rev2() -> Self {
        Self {
            revision: SnesRevision::Rev2,
            name: "rev2",
            note_threshold: 0xc8,
            divisor: 14,
            // class is the remainder in this revision
            class_is_quotient: false,
            tie_class: 12,
            rest_class: 13,
            duration_table: &REV2_DURATIONS,
            addressing: SnesAddressing::Direct,
            vaddr_constant: 0,
            load_address: 0x2000,
            voice_count: 16,
            native_ppqn: SNES_DEFAULT_PPQN,
        }
    }

    pub fn rev3() -> Self {
        Self {
            revision: SnesRevision::Rev3,
            name: "rev3",
            note_threshold: 0xd2,
            divisor: 15,
            class_is_quotient: true,
            tie_class: 12,
            rest_class: 13,
            duration_table: &REV1_DURATIONS,
            addressing: SnesAddressing::Corrected,
            vaddr_constant: 0x2100,
            load_address: 0x2000,
            voice_count: 8,
            native_ppqn: SNES_DEFAULT_PPQN,
        }
    }

    /// Built-in dispatch table for this revision.
    pub fn dispatch_table(&self) -> DispatchTable {
        match self.revision {
            SnesRevision::Rev1 => rev1_dispatch_table(),
            SnesRevision::Rev2 => rev2_dispatch_table(),
            SnesRevision::Rev3 => rev3_dispatch_table(),
        }
    }

    fn min_header_size(&self) -> usize {
        let table = self.voice_count * 2;
        match self.addressing {
            SnesAddressing::Direct => table,
            SnesAddressing::Corrected => table + 2,
        }
    }
}

pub mod rev1_opcodes {
    // opcodes 0x00 - 0xd1 are note-encoded (class = byte / 15)

    pub const TEMPO: u8 = 0xd2;
    pub const TEMPO_FADE: u8 = 0xd3;
    pub const VOLUME: u8 = 0xd4;
    pub const VOLUME_FADE: u8 = 0xd5;
    pub const PAN: u8 = 0xd6;
    pub const PAN_FADE: u8 = 0xd7;

    pub const OCTAVE_SET: u8 = 0xd8;
    pub const OCTAVE_INC: u8 = 0xd9;
    pub const OCTAVE_DEC: u8 = 0xda;

    pub const PATCH_CHANGE: u8 = 0xdb;
    pub const ENVELOPE: u8 = 0xdc;
    pub const STACCATO: u8 = 0xdd;

    pub const SLUR_ON: u8 = 0xde;
    pub const SLUR_OFF: u8 = 0xdf;
    pub const ROLL_ON: u8 = 0xe0;
    pub const ROLL_OFF: u8 = 0xe1;

    pub const MASTER_VOLUME: u8 = 0xe2;
    pub const VOLUME_MULTIPLIER: u8 = 0xe3;

    pub const LOOP_START: u8 = 0xe4;
    pub const LOOP_END: u8 = 0xe5;
    pub const LOOP_BREAK: u8 = 0xe6;
    pub const LOOP_MARK: u8 = 0xe7;

    pub const GOTO: u8 = 0xe8;
    pub const HALT: u8 = 0xe9;

    pub const ECHO_PARAMS: u8 = 0xea;
    pub const PITCH_BEND: u8 = 0xeb;
    pub const VIBRATO: u8 = 0xec;
}

pub mod rev2_opcodes {
    // opcodes 0x00 - 0xc7 are note-encoded (class = byte % 14)

    pub const TEMPO: u8 = 0xc8;
    pub const VOLUME: u8 = 0xc9;
    pub const VOLUME_FADE: u8 = 0xca;
    pub const PAN: u8 = 0xcb;

    pub const OCTAVE_SET: u8 = 0xcc;
    pub const OCTAVE_INC: u8 = 0xcd;
    pub const OCTAVE_DEC: u8 = 0xce;

    pub const PATCH_CHANGE: u8 = 0xcf;
    pub const ENVELOPE: u8 = 0xd0;

    pub const SLUR_ON: u8 = 0xd1;
    pub const SLUR_OFF: u8 = 0xd2;

    pub const LOOP_START: u8 = 0xd3;
    pub const LOOP_END: u8 = 0xd4;
    pub const LOOP_BREAK: u8 = 0xd5;

    pub const GOTO: u8 = 0xd6;
    pub const HALT: u8 = 0xd7;

    pub const MASTER_VOLUME: u8 = 0xd8;
    pub const TUNING: u8 = 0xd9;
    pub const NOISE_FREQ: u8 = 0xda;
}

pub mod rev3_opcodes {
    pub use super::rev1_opcodes::*;

    pub const UTILITY_DURATION: u8 = 0xf0;
    pub const PERCUSSION_ON: u8 = 0xf1;
    pub const PERCUSSION_OFF: u8 = 0xf2;
}

fn rev1_entries() -> Vec<(u8, OpcodeDef)> {
    use rev1_opcodes as op;
    use OpcodeSemantic as S;

    vec![
        (op::TEMPO, OpcodeDef::new(S::Tempo, 1)),
        (op::TEMPO_FADE, OpcodeDef::new(S::TempoFade, 2).with_value_index(1)),
        (op::VOLUME, OpcodeDef::new(S::Volume, 1)),
        (op::VOLUME_FADE, OpcodeDef::new(S::VolumeFade, 2).with_value_index(1)),
        (op::PAN, OpcodeDef::new(S::Pan, 1)),
        (op::PAN_FADE, OpcodeDef::new(S::PanFade, 2).with_value_index(1)),
        (op::OCTAVE_SET, OpcodeDef::new(S::OctaveSet, 1)),
        (op::OCTAVE_INC, OpcodeDef::new(S::OctaveInc, 0)),
        (op::OCTAVE_DEC, OpcodeDef::new(S::OctaveDec, 0)),
        (op::PATCH_CHANGE, OpcodeDef::new(S::PatchChange, 1)),
        (op::ENVELOPE, OpcodeDef::new(S::Envelope, 2)),
        (op::STACCATO, OpcodeDef::new(S::Staccato, 1)),
        (op::SLUR_ON, OpcodeDef::new(S::SlurOn, 0)),
        (op::SLUR_OFF, OpcodeDef::new(S::SlurOff, 0)),
        (op::ROLL_ON, OpcodeDef::new(S::RollOn, 0)),
        (op::ROLL_OFF, OpcodeDef::new(S::RollOff, 0)),
        (op::MASTER_VOLUME, OpcodeDef::new(S::MasterVolume, 1)),
        (op::VOLUME_MULTIPLIER, OpcodeDef::new(S::VolumeMultiplier, 1)),
        (op::LOOP_START, OpcodeDef::new(S::LoopStart, 1)),
        (op::LOOP_END, OpcodeDef::new(S::LoopEnd, 0)),
        (op::LOOP_BREAK, OpcodeDef::new(S::LoopBreak, 3)),
        (op::LOOP_MARK, OpcodeDef::new(S::LoopMark, 0)),
        (op::GOTO, OpcodeDef::new(S::Goto, 2)),
        (op::HALT, OpcodeDef::new(S::Halt, 0)),
        // Known opcodes with no modeled handler: valid branch targets.
        (op::ECHO_PARAMS, OpcodeDef::new(S::Nop, 3)),
        (op::PITCH_BEND, OpcodeDef::new(S::Nop, 2)),
        (op::VIBRATO, OpcodeDef::new(S::Nop, 2)),
    ]
}

pub fn rev1_dispatch_table() -> DispatchTable {
    DispatchTable::from_entries(&rev1_entries()).unwrap()
}

pub fn rev2_dispatch_table() -> DispatchTable {
    use rev2_opcodes as op;
    use OpcodeSemantic as S;

    let entries = [
        (op::TEMPO, OpcodeDef::new(S::Tempo, 1)),
        // rev2 stores volumes halved
        (
            op::VOLUME,
            OpcodeDef::new(S::Volume, 1).with_special(SpecialHandler::DoubleValue),
        ),
        (
            op::VOLUME_FADE,
            OpcodeDef::new(S::VolumeFade, 2)
                .with_value_index(1)
                .with_special(SpecialHandler::DoubleValue),
        ),
        (op::PAN, OpcodeDef::new(S::Pan, 1)),
        (op::OCTAVE_SET, OpcodeDef::new(S::OctaveSet, 1)),
        (op::OCTAVE_INC, OpcodeDef::new(S::OctaveInc, 0)),
        (op::OCTAVE_DEC, OpcodeDef::new(S::OctaveDec, 0)),
        (op::PATCH_CHANGE, OpcodeDef::new(S::PatchChange, 1)),
        (op::ENVELOPE, OpcodeDef::new(S::Envelope, 2)),
        (op::SLUR_ON, OpcodeDef::new(S::SlurOn, 0)),
        (op::SLUR_OFF, OpcodeDef::new(S::SlurOff, 0)),
        (op::LOOP_START, OpcodeDef::new(S::LoopStart, 1)),
        (op::LOOP_END, OpcodeDef::new(S::LoopEnd, 0)),
        (op::LOOP_BREAK, OpcodeDef::new(S::LoopBreak, 3)),
        (op::GOTO, OpcodeDef::new(S::Goto, 2)),
        (op::HALT, OpcodeDef::new(S::Halt, 0)),
        (
            op::MASTER_VOLUME,
            OpcodeDef::new(S::MasterVolume, 1).with_special(SpecialHandler::DoubleValue),
        ),
        (op::TUNING, OpcodeDef::new(S::Nop, 1)),
        (op::NOISE_FREQ, OpcodeDef::new(S::Nop, 1)),
    ];

    DispatchTable::from_entries(&entries).unwrap()
}

pub fn rev3_dispatch_table() -> DispatchTable {
    use rev3_opcodes as op;
    use OpcodeSemantic as S;

    let mut entries = rev1_entries();
    // Inline escape: one raw duration byte overriding the next note.
    entries.push((op::UTILITY_DURATION, OpcodeDef::new(S::UtilityDuration, 1)));
    entries.push((op::PERCUSSION_ON, OpcodeDef::new(S::PercussionOn, 0)));
    entries.push((op::PERCUSSION_OFF, OpcodeDef::new(S::PercussionOff, 0)));

    DispatchTable::from_entries(&entries).unwrap()
}

#[derive(Debug, Clone)]
pub struct SnesHeader {
    /// Raw pointer-table words, one per voice.
    pub raw_pointers: Vec<u16>,
    /// Per-song address correction (zero for Direct addressing).
    pub vaddr_offset: u16,
    native_ppqn: u32,
    offsets: Vec<u32>,
}

impl SnesHeader {
    pub fn track_offsets(&self) -> Vec<u32> {
        self.offsets.clone()
    }

    pub fn native_ppqn(&self) -> u32 {
        self.native_ppqn
    }
}

pub struct SnesFormat {
    pub variant: SnesVariant,
}

impl SnesFormat {
    pub fn new(variant: SnesVariant) -> Self {
        Self { variant }
    }

    pub fn parse_header(&self, data: &[u8], _params: &SongParams) -> Result<SnesHeader, FormatError> {
        let v = &self.variant;

        let minimum = v.min_header_size();
        if data.len() < minimum {
            return Err(FormatError::HeaderTooShort {
                length: data.len(),
                minimum,
            });
        }

        let mut raw_pointers = Vec::with_capacity(v.voice_count);
        for voice in 0..v.voice_count {
            let o = voice * 2;
            raw_pointers.push(u16::from_le_bytes([data[o], data[o + 1]]));
        }

        let vaddr_offset = match v.addressing {
            SnesAddressing::Direct => 0,
            SnesAddressing::Corrected => {
                let o = v.voice_count * 2;
                let raw = u16::from_le_bytes([data[o], data[o + 1]]);
                v.vaddr_constant.wrapping_sub(raw)
            }
        };

        let mut offsets = Vec::new();
        for &ptr in &raw_pointers {
            // Pointers below the threshold mark unused voices.
            if ptr < SNES_UNUSED_POINTER_THRESHOLD {
                continue;
            }
            offsets.push(u32::from(
                ptr.wrapping_add(vaddr_offset).wrapping_sub(v.load_address),
            ));
        }

        if offsets.is_empty() {
            return Err(FormatError::NoActiveVoices);
        }

        Ok(SnesHeader {
            raw_pointers,
            vaddr_offset,
            native_ppqn: v.native_ppqn,
            offsets,
        })
    }

    pub(crate) fn decode_track(
        &self,
        data: &[u8],
        header: &SnesHeader,
        offset: u32,
        track_number: u8,
        tables: &SongTables,
        track_boundaries: &[u32],
    ) -> Result<(Vec<String>, Vec<IrEvent>), SequenceError> {
        let v = &self.variant;

        let encoding = NoteEncoding {
            divisor: v.divisor,
            class_is_quotient: v.class_is_quotient,
            tie_class: v.tie_class,
            rest_class: v.rest_class,
            duration_table: v.duration_table,
        };

        let mut cursor = ByteCursor::new(data, offset)?;
        let mut events = Vec::new();
        let mut disasm = Vec::new();
        let mut state = DecodeState::default();

        log::debug!(
            "decoding SNES ({}) track {} at {:#06x}",
            v.name,
            track_number,
            offset
        );

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

            if byte < v.note_threshold {
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
            } else {
                let def = *tables
                    .dispatch
                    .get(byte)
                    .ok_or(SequenceError::UnknownOpcode { offset: at, opcode: byte })?;

                let operands = cursor.read_operands(at, byte, def.operands)?;
                let resolve = |operand_offset: u32, bytes: &[u8]| {
                    snes_target(v, header.vaddr_offset, operand_offset, bytes)
                };
                let (kind, control) = event_from_opcode(
                    &def,
                    at,
                    &operands,
                    SNES_TEMPO_FACTOR,
                    tables,
                    &mut state,
                    resolve,
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

/// SNES branch targets: little-endian absolute pointer, optionally corrected,
/// rebased to a file offset. All arithmetic is 16-bit wrapping.
fn snes_target(variant: &SnesVariant, vaddr_offset: u16, _operand_offset: u32, bytes: &[u8]) -> u32 {
    let lo = bytes.first().copied().unwrap_or(0);
    let hi = bytes.get(1).copied().unwrap_or(0);
    let ptr = u16::from_le_bytes([lo, hi]);

    let corrected = match variant.addressing {
        SnesAddressing::Direct => ptr,
        SnesAddressing::Corrected => ptr.wrapping_add(vaddr_offset),
    };

    u32::from(corrected.wrapping_sub(variant.load_address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_target_rebased() {
        let v = SnesVariant::rev1();
        // pointer 0x2042 with load base 0x2000
        assert_eq!(snes_target(&v, 0, 0, &[0x42, 0x20]), 0x42);
    }

    #[test]
    fn corrected_target_wraps_16bit() {
        let v = SnesVariant::rev3();
        // raw header field 0x2200 -> vaddr_offset = (0x2100 - 0x2200) mod 0x10000
        let vaddr = v.vaddr_constant.wrapping_sub(0x2200);
        assert_eq!(vaddr, 0xff00);
        // pointer 0x2142 + 0xff00 wraps to 0x2042, minus base = 0x42
        assert_eq!(snes_target(&v, vaddr, 0, &[0x42, 0x21]), 0x42);
    }

    #[test]
    fn rev2_note_split_is_remainder_class() {
        let v = SnesVariant::rev2();
        let enc = NoteEncoding {
            divisor: v.divisor,
            class_is_quotient: v.class_is_quotient,
            tie_class: v.tie_class,
            rest_class: v.rest_class,
            duration_table: v.duration_table,
        };

        // byte 30 = 2*14 + 2: class 2, duration index 2
        assert_eq!(enc.split(30), (2, 2));
        // duration index 14 is out of range for the 13-entry table
        let byte = 14 * 14 + 3; // class 3, index 14
        let (class, index) = enc.split(byte as u8);
        assert_eq!(class, 3);
        assert!(enc.duration(0, index).is_err());
    }
}
