//! Intermediate representation of decoded sequence tracks

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use crate::time::TickCounter;

use std::collections::BTreeMap;

use serde::Serialize;

pub const NOTE_CLASSES_PER_OCTAVE: u8 = 12;

/// Instrument context resolved at decode time.
///
/// A negative `program` encodes a percussion key (`-program`) played on the
/// dedicated percussion channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentContext {
    pub program: i16,
    pub transpose_octaves: i8,
}

impl InstrumentContext {
    pub fn is_percussion(&self) -> bool {
        self.program < 0
    }

    pub fn percussion_key(&self) -> Option<u8> {
        if self.program < 0 {
            u8::try_from(-self.program).ok()
        } else {
            None
        }
    }
}

/// One decoded instruction.
///
/// Branch targets are resolved by byte offset, never by list index: the
/// offset is the only identity that survives re-decoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IrEvent {
    /// Source byte offset of the instruction (opcode byte).
    pub offset: u32,
    /// Raw instruction bytes (opcode + operands).
    pub raw: Vec<u8>,
    pub kind: IrKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IrKind {
    Note {
        /// Note class within an octave (0-11).
        class: u8,
        ticks: TickCounter,
        /// Statically-resolved instrument context.
        ///
        /// The octave is deliberately absent: it is Pass-2 runtime state and
        /// may differ between loop iterations of the same Note event.
        instrument: Option<InstrumentContext>,
        percussion: bool,
    },
    Rest {
        ticks: TickCounter,
    },
    Tie {
        ticks: TickCounter,
    },

    Tempo {
        bpm: f64,
    },
    TempoFade {
        ticks: TickCounter,
        target_bpm: f64,
    },

    PatchChange {
        index: u8,
        instrument: Option<InstrumentContext>,
    },

    OctaveSet {
        octave: u8,
    },
    OctaveInc,
    OctaveDec,

    Volume {
        value: u8,
    },
    VolumeFade {
        ticks: TickCounter,
        target: u8,
    },
    Pan {
        value: u8,
    },
    PanFade {
        ticks: TickCounter,
        target: u8,
    },

    SlurOn,
    SlurOff,
    RollOn,
    RollOff,
    Staccato {
        /// Percentage of the note duration that is sounded (1-100).
        percent: u8,
    },

    /// One-shot duration override applied to the next note.
    UtilityDuration {
        ticks: TickCounter,
    },

    MasterVolume {
        value: u8,
    },
    VolumeMultiplier {
        value: u8,
    },

    PercussionOn,
    PercussionOff,

    LoopStart {
        count: u8,
    },
    LoopEnd,
    LoopBreak {
        /// Loop iteration (1-based) on which the break is taken.
        condition: u8,
        target: u32,
    },
    LoopMark,

    Goto {
        target: u32,
    },
    Halt,

    /// Envelope parameters (raw operand bytes are in `IrEvent::raw`).
    Envelope,

    /// Known opcode with no modeled handler.
    ///
    /// Kept in the IR so the instruction remains a valid branch target.
    Nop,
}

impl IrEvent {
    /// Native-tick duration consumed by this event (zero for non-timing events).
    pub fn ticks(&self) -> TickCounter {
        match &self.kind {
            IrKind::Note { ticks, .. } | IrKind::Rest { ticks } | IrKind::Tie { ticks } => *ticks,
            _ => TickCounter::ZERO,
        }
    }

    pub fn is_backward_goto(&self) -> bool {
        match self.kind {
            IrKind::Goto { target } => target < self.offset,
            _ => false,
        }
    }
}

/// Loop facts derived from one track's finished IR.
///
/// Immutable once computed.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct LoopInfo {
    pub has_backward_branch: bool,
    pub intro_ticks: TickCounter,
    pub loop_ticks: TickCounter,
    pub target_index: Option<usize>,
    /// Playthrough length: intro plus two loop repetitions.
    ///
    /// A rendering convention, not a hardware fact.
    pub target_ticks: TickCounter,
}

impl LoopInfo {
    pub fn without_loop(total: TickCounter) -> Self {
        Self {
            has_backward_branch: false,
            intro_ticks: total,
            loop_ticks: TickCounter::ZERO,
            target_index: None,
            target_ticks: total,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Track {
    pub number: u8,
    pub start_offset: u32,
    pub events: Vec<IrEvent>,
    pub disassembly: Vec<String>,
    pub loop_info: Option<LoopInfo>,
}

impl Track {
    pub fn new(number: u8, start_offset: u32, events: Vec<IrEvent>, disassembly: Vec<String>) -> Self {
        debug_assert!(events.windows(2).all(|w| w[0].offset < w[1].offset));

        Self {
            number,
            start_offset,
            events,
            disassembly,
            loop_info: None,
        }
    }

    /// Resolves a branch target offset to an event index (exact match only).
    pub fn index_of_offset(&self, offset: u32) -> Option<usize> {
        self.events.binary_search_by_key(&offset, |e| e.offset).ok()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Song {
    pub id: u32,
    pub title: String,
    /// Native ticks per quarter note of the source format.
    pub native_ppqn: u32,
    pub tracks: BTreeMap<u8, Track>,
}

impl Song {
    /// Target playthrough length: the maximum `target_ticks` across tracks.
    pub fn target_ticks(&self) -> TickCounter {
        self.tracks
            .values()
            .filter_map(|t| t.loop_info.map(|li| li.target_ticks))
            .max()
            .unwrap_or(TickCounter::ZERO)
    }

    pub fn total_events(&self) -> usize {
        self.tracks.values().map(|t| t.events.len()).sum()
    }

    /// Resolves a branch target offset to a (track number, event index) pair.
    ///
    /// Searched across all tracks: cross-track branches are legal.
    pub fn resolve_offset(&self, offset: u32) -> Option<(u8, usize)> {
        self.tracks
            .values()
            .find_map(|t| t.index_of_offset(offset).map(|i| (t.number, i)))
    }
}
