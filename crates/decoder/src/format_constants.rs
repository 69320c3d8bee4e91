//! Format constants

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

// These values MUST match the reverse-engineered sequence engines.

// PSX sequencer
// =============

pub const PSX_VOICE_COUNT: usize = 32;

pub const PSX_HEADER_MASK_OFFSET: usize = 0;
pub const PSX_HEADER_PPQN_OFFSET: usize = 4;
pub const PSX_PRIMARY_TABLE_OFFSET: usize = 8;
pub const PSX_ALTERNATE_TABLE_OFFSET: usize = PSX_PRIMARY_TABLE_OFFSET + PSX_VOICE_COUNT * 2;

pub const PSX_MIN_HEADER_SIZE: usize = PSX_ALTERNATE_TABLE_OFFSET + PSX_VOICE_COUNT * 2;

/// Bytes below this value are table-encoded notes.
pub const PSX_NOTE_TABLE_THRESHOLD: u8 = 0x70;

/// Reserved extended-note range: note class plus one raw duration byte.
pub const PSX_EXT_NOTE_FIRST: u8 = 0x70;
pub const PSX_EXT_NOTE_LAST: u8 = 0x7d;

pub const PSX_NOTE_DIVISOR: u8 = 8;
pub const PSX_TIE_CLASS: u8 = 12;
pub const PSX_REST_CLASS: u8 = 13;

pub const PSX_DURATION_TABLE: [u8; 8] = [192, 96, 48, 24, 12, 6, 3, 144];

pub const PSX_DEFAULT_PPQN: u32 = 48;

// SNES sound-engine family
// ========================

/// Track pointers below this value mark an unused voice.
pub const SNES_UNUSED_POINTER_THRESHOLD: u16 = 0x100;

pub const SNES_DEFAULT_PPQN: u32 = 48;

// Expansion defaults
// ==================

pub const DEFAULT_MAX_EXPANSION_EVENTS: usize = 100_000;

/// Step ceiling is this many interpreter steps per IR event.
pub const DEFAULT_STEPS_PER_EVENT: usize = 256;

pub const DEFAULT_WALL_CLOCK_LIMIT_MS: u64 = 10_000;

/// Default note gate: the sounded duration ends this many native ticks early.
pub const DEFAULT_GATE_TICKS: u32 = 2;

/// Discrete fade interpolation cadence, in output ticks.
pub const DEFAULT_FADE_CADENCE_TICKS: u64 = 4;

/// General MIDI percussion channel.
pub const PERCUSSION_CHANNEL: u8 = 9;

pub const MIDI_CHANNELS: u8 = 16;
