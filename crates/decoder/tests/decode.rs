//! Pass-1 decode tests

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use decoder::data::{InstrumentEntry, InstrumentMap, PercussionMap};
use decoder::errors::{FormatError, SequenceError, SongError};
use decoder::format_constants::{PSX_MIN_HEADER_SIZE, PSX_VOICE_COUNT};
use decoder::ir::{IrKind, Song};
use decoder::psx::{opcodes, psx_dispatch_table, PsxFormat};
use decoder::snes::{rev2_opcodes, SnesFormat, SnesVariant};
use decoder::songs::decode_song;
use decoder::time::TickCounter;
use decoder::{FormatDecoder, SongParams, SongTables};

// PSX image builder
// =================

/// PSX header with the given voice-0 pointers, followed by `body`.
fn psx_image(primary: u16, alternate: u16, body: &[u8]) -> Vec<u8> {
    let mut image = vec![0; PSX_MIN_HEADER_SIZE];

    // voice 0 active
    image[0..4].copy_from_slice(&1u32.to_le_bytes());
    // native ppqn
    image[4..6].copy_from_slice(&48u16.to_le_bytes());

    image[8..10].copy_from_slice(&primary.to_le_bytes());
    let alt = 8 + PSX_VOICE_COUNT * 2;
    image[alt..alt + 2].copy_from_slice(&alternate.to_le_bytes());

    image.extend_from_slice(body);
    image
}

fn psx_params() -> SongParams {
    SongParams {
        song_id: 1,
        title: "test".to_owned(),
        use_alternate_pointers: false,
    }
}

fn decode_psx(image: &[u8], params: &SongParams) -> Result<Song, SongError> {
    let dispatch = psx_dispatch_table();
    let instruments = InstrumentMap::from_entries(vec![
        InstrumentEntry {
            program: 5,
            transpose_octaves: 0,
        },
        InstrumentEntry {
            program: 20,
            transpose_octaves: -1,
        },
    ]);
    let percussion = PercussionMap::from_entries(vec![
        InstrumentEntry {
            program: -36,
            transpose_octaves: 0,
        },
        InstrumentEntry {
            program: -38,
            transpose_octaves: 0,
        },
    ]);
    let tables = SongTables {
        dispatch: &dispatch,
        instruments: &instruments,
        percussion: Some(&percussion),
    };

    decode_song(image, &FormatDecoder::Psx(PsxFormat), params, &tables)
}

/// PSX note byte: class * 8 + duration index.
fn note_byte(class: u8, duration_index: u8) -> u8 {
    class * 8 + duration_index
}

// PSX tests
// =========

#[test]
fn psx_notes_rests_and_ties() {
    let base = PSX_MIN_HEADER_SIZE as u16;
    let image = psx_image(
        base,
        0,
        &[
            note_byte(0, 2),  // class 0, 48 ticks
            note_byte(13, 2), // rest, 48 ticks
            note_byte(12, 3), // tie, 24 ticks
            opcodes::HALT,
        ],
    );

    let song = decode_psx(&image, &psx_params()).unwrap();
    assert_eq!(song.native_ppqn, 48);
    assert_eq!(song.tracks.len(), 1);

    let track = &song.tracks[&0];
    assert_eq!(track.events.len(), 4);
    assert!(matches!(
        track.events[0].kind,
        IrKind::Note { class: 0, ticks, percussion: false, .. } if ticks == TickCounter::new(48)
    ));
    assert!(matches!(
        track.events[1].kind,
        IrKind::Rest { ticks } if ticks == TickCounter::new(48)
    ));
    assert!(matches!(
        track.events[2].kind,
        IrKind::Tie { ticks } if ticks == TickCounter::new(24)
    ));
    assert!(matches!(track.events[3].kind, IrKind::Halt));

    // one disassembly line per event
    assert_eq!(track.disassembly.len(), track.events.len());

    // offsets strictly increase
    assert!(track.events.windows(2).all(|w| w[0].offset < w[1].offset));
}

#[test]
fn psx_extended_note_reads_raw_duration() {
    let base = PSX_MIN_HEADER_SIZE as u16;
    let image = psx_image(base, 0, &[0x70 + 3, 100, opcodes::HALT]);

    let song = decode_psx(&image, &psx_params()).unwrap();
    let track = &song.tracks[&0];

    assert!(matches!(
        track.events[0].kind,
        IrKind::Note { class: 3, ticks, .. } if ticks == TickCounter::new(100)
    ));
}

#[test]
fn psx_patch_change_annotates_notes() {
    let base = PSX_MIN_HEADER_SIZE as u16;
    let image = psx_image(
        base,
        0,
        &[
            opcodes::PATCH_CHANGE,
            1,
            note_byte(4, 2),
            opcodes::HALT,
        ],
    );

    let song = decode_psx(&image, &psx_params()).unwrap();
    let track = &song.tracks[&0];

    match &track.events[1].kind {
        IrKind::Note { instrument, .. } => {
            let i = instrument.expect("instrument context");
            assert_eq!(i.program, 20);
            assert_eq!(i.transpose_octaves, -1);
        }
        k => panic!("expected note, got {:?}", k),
    }
}

#[test]
fn psx_percussion_mode_bakes_keys() {
    let base = PSX_MIN_HEADER_SIZE as u16;
    let image = psx_image(
        base,
        0,
        &[
            opcodes::PERCUSSION_ON,
            note_byte(1, 2),
            opcodes::PERCUSSION_OFF,
            note_byte(1, 2),
            opcodes::HALT,
        ],
    );

    let song = decode_psx(&image, &psx_params()).unwrap();
    let track = &song.tracks[&0];

    match &track.events[1].kind {
        IrKind::Note {
            percussion: true,
            instrument: Some(i),
            ..
        } => {
            assert_eq!(i.percussion_key(), Some(38));
        }
        k => panic!("expected percussion note, got {:?}", k),
    }
    assert!(matches!(
        track.events[3].kind,
        IrKind::Note { percussion: false, .. }
    ));
}

#[test]
fn psx_goto_ends_scan_and_marks_loop() {
    let base = PSX_MIN_HEADER_SIZE;

    // intro note, two loop notes, goto back to the second note
    let goto_at = base + 3;
    let target = base + 1;
    let displacement = (target as i64 - (goto_at + 1) as i64) as i16;

    let mut body = vec![
        note_byte(0, 3), // 24 ticks
        note_byte(2, 3), // 24 ticks
        note_byte(4, 3), // 24 ticks
        opcodes::GOTO,
    ];
    body.extend_from_slice(&displacement.to_le_bytes());
    // bytes after the goto are never scanned
    body.push(0xff);

    let image = psx_image(base as u16, 0, &body);
    let song = decode_psx(&image, &psx_params()).unwrap();
    let track = &song.tracks[&0];

    assert!(matches!(
        track.events.last().unwrap().kind,
        IrKind::Goto { target: t } if t == target as u32
    ));

    let li = track.loop_info.expect("loop info");
    assert!(li.has_backward_branch);
    assert_eq!(li.intro_ticks, TickCounter::new(24));
    assert_eq!(li.loop_ticks, TickCounter::new(48));
    assert_eq!(li.target_ticks, TickCounter::new(120));
    assert_eq!(li.target_index, Some(1));
}

#[test]
fn psx_decoding_is_idempotent() {
    let base = PSX_MIN_HEADER_SIZE as u16;
    let image = psx_image(
        base,
        0,
        &[
            opcodes::TEMPO,
            120,
            note_byte(0, 1),
            note_byte(7, 0),
            opcodes::HALT,
        ],
    );

    let a = decode_psx(&image, &psx_params()).unwrap();
    let b = decode_psx(&image, &psx_params()).unwrap();

    assert_eq!(a.tracks[&0].events, b.tracks[&0].events);
    assert_eq!(a.tracks[&0].disassembly, b.tracks[&0].disassembly);
}

#[test]
fn psx_alternate_pointer_table() {
    let base = PSX_MIN_HEADER_SIZE as u16;
    // primary pointer is garbage; the alternate points at the body
    let image = psx_image(0xffff, base, &[note_byte(0, 0), opcodes::HALT]);

    let primary = decode_psx(&image, &psx_params());
    assert!(matches!(primary, Err(SongError::NoDecodableTracks)));

    let params = SongParams {
        use_alternate_pointers: true,
        ..psx_params()
    };
    let song = decode_psx(&image, &params).unwrap();
    assert_eq!(song.tracks[&0].events.len(), 2);
}

#[test]
fn psx_scan_stops_at_next_track_start() {
    let base = PSX_MIN_HEADER_SIZE;

    let mut image = psx_image((base) as u16, 0, &[]);
    // voices 0 and 1 active
    image[0..4].copy_from_slice(&3u32.to_le_bytes());
    image[10..12].copy_from_slice(&((base + 2) as u16).to_le_bytes());

    // track 0: two notes, no halt; track 1 starts right after
    image.extend_from_slice(&[note_byte(0, 0), note_byte(1, 0)]);
    image.extend_from_slice(&[note_byte(2, 0), opcodes::HALT]);

    let song = decode_psx(&image, &psx_params()).unwrap();

    assert_eq!(song.tracks[&0].events.len(), 2);
    assert_eq!(song.tracks[&1].events.len(), 2);
}

// PSX error tests
// ===============

#[test]
fn psx_header_too_short() {
    let image = vec![0; 16];
    let e = decode_psx(&image, &psx_params()).unwrap_err();
    assert!(matches!(
        e,
        SongError::Format(FormatError::HeaderTooShort { length: 16, .. })
    ));
}

#[test]
fn psx_no_active_voices() {
    let image = vec![0; PSX_MIN_HEADER_SIZE];
    let e = decode_psx(&image, &psx_params()).unwrap_err();
    assert!(matches!(e, SongError::Format(FormatError::NoActiveVoices)));
}

#[test]
fn psx_truncated_operand() {
    let base = PSX_MIN_HEADER_SIZE as u16;
    // volume_fade wants two operand bytes; only one present
    let image = psx_image(base, 0, &[opcodes::VOLUME_FADE, 10]);

    let decoder = FormatDecoder::Psx(PsxFormat);
    let params = psx_params();
    let header = decoder.parse_header(&image, &params).unwrap();

    let dispatch = psx_dispatch_table();
    let instruments = InstrumentMap::default();
    let tables = SongTables {
        dispatch: &dispatch,
        instruments: &instruments,
        percussion: None,
    };

    let e = decoder
        .decode_track(&image, &header, u32::from(base), 0, &tables, &[])
        .unwrap_err();
    assert!(matches!(
        e,
        SequenceError::TruncatedOperand {
            opcode: opcodes::VOLUME_FADE,
            expected: 2,
            ..
        }
    ));
}

#[test]
fn psx_unknown_opcode() {
    let base = PSX_MIN_HEADER_SIZE as u16;
    // 0xfe is not in the built-in dispatch table
    let image = psx_image(base, 0, &[0xfe]);

    let decoder = FormatDecoder::Psx(PsxFormat);
    let params = psx_params();
    let header = decoder.parse_header(&image, &params).unwrap();

    let dispatch = psx_dispatch_table();
    let instruments = InstrumentMap::default();
    let tables = SongTables {
        dispatch: &dispatch,
        instruments: &instruments,
        percussion: None,
    };

    let e = decoder
        .decode_track(&image, &header, u32::from(base), 0, &tables, &[])
        .unwrap_err();
    assert!(matches!(
        e,
        SequenceError::UnknownOpcode { opcode: 0xfe, .. }
    ));
}

#[test]
fn psx_bad_track_offset_is_skipped() {
    // voice 0 points far past the end of the image
    let image = psx_image(0x7fff, 0, &[note_byte(0, 0)]);
    let e = decode_psx(&image, &psx_params()).unwrap_err();
    assert!(matches!(e, SongError::NoDecodableTracks));
}

// SNES tests
// ==========

fn snes_tables(variant: &SnesVariant) -> (decoder::data::DispatchTable, InstrumentMap) {
    (variant.dispatch_table(), InstrumentMap::default())
}

/// rev1/rev3 image: 8 pointers, optional vaddr field, then `body` at `body_offset`.
fn snes_image(pointers: &[u16], raw_vaddr: Option<u16>, body_offset: usize, body: &[u8]) -> Vec<u8> {
    let mut image = Vec::new();
    for p in pointers {
        image.extend_from_slice(&p.to_le_bytes());
    }
    if let Some(raw) = raw_vaddr {
        image.extend_from_slice(&raw.to_le_bytes());
    }
    image.resize(body_offset, 0);
    image.extend_from_slice(body);
    image
}

#[test]
fn snes_rev1_pointer_table() {
    let variant = SnesVariant::rev1();
    let (dispatch, instruments) = snes_tables(&variant);
    let tables = SongTables {
        dispatch: &dispatch,
        instruments: &instruments,
        percussion: None,
    };

    // voice 0 at 0x2020, voice 3 at 0x2024, the rest unused
    let mut pointers = [0u16; 8];
    pointers[0] = 0x2020;
    pointers[3] = 0x2024;

    // rev1 note byte: class * 15 + duration index
    let image = snes_image(
        &pointers,
        None,
        0x20,
        &[
            15 + 2, // class 1
            decoder::snes::rev1_opcodes::HALT,
            0,
            0,
            2 * 15, // class 2
            decoder::snes::rev1_opcodes::HALT,
        ],
    );

    let song = decode_song(
        &image,
        &FormatDecoder::Snes(SnesFormat::new(variant)),
        &psx_params(),
        &tables,
    )
    .unwrap();

    assert_eq!(song.tracks.len(), 2);
    assert!(matches!(
        song.tracks[&0].events[0].kind,
        IrKind::Note { class: 1, .. }
    ));
    assert!(matches!(
        song.tracks[&1].events[0].kind,
        IrKind::Note { class: 2, .. }
    ));
}

#[test]
fn snes_rev3_corrected_addressing() {
    let variant = SnesVariant::rev3();
    let (dispatch, instruments) = snes_tables(&variant);
    let tables = SongTables {
        dispatch: &dispatch,
        instruments: &instruments,
        percussion: None,
    };

    // Song relocated by 0x100: raw header field 0x2200 gives
    // vaddr_offset = 0x2100 - 0x2200 = -0x100 (mod 2^16).
    let mut pointers = [0u16; 8];
    pointers[0] = 0x2120; // corrected to 0x2020, file offset 0x20

    let image = snes_image(
        &pointers,
        Some(0x2200),
        0x20,
        &[15, decoder::snes::rev3_opcodes::HALT],
    );

    let song = decode_song(
        &image,
        &FormatDecoder::Snes(SnesFormat::new(variant)),
        &psx_params(),
        &tables,
    )
    .unwrap();

    let track = &song.tracks[&0];
    assert_eq!(track.start_offset, 0x20);
    assert!(matches!(track.events[0].kind, IrKind::Note { class: 1, .. }));
}

#[test]
fn snes_rev2_doubled_volume_operand() {
    let variant = SnesVariant::rev2();
    let (dispatch, instruments) = snes_tables(&variant);
    let tables = SongTables {
        dispatch: &dispatch,
        instruments: &instruments,
        percussion: None,
    };

    let mut pointers = [0u16; 16];
    pointers[0] = 0x2040;

    let mut image = Vec::new();
    for p in pointers {
        image.extend_from_slice(&p.to_le_bytes());
    }
    image.resize(0x40, 0);
    image.extend_from_slice(&[rev2_opcodes::VOLUME, 0x40, rev2_opcodes::HALT]);

    let song = decode_song(
        &image,
        &FormatDecoder::Snes(SnesFormat::new(variant)),
        &psx_params(),
        &tables,
    )
    .unwrap();

    assert!(matches!(
        song.tracks[&0].events[0].kind,
        IrKind::Volume { value: 0x80 }
    ));
}

#[test]
fn snes_rev2_duration_index_out_of_range() {
    let variant = SnesVariant::rev2();
    assert_eq!(variant.duration_table.len(), 13);

    let (dispatch, instruments) = snes_tables(&variant);
    let tables = SongTables {
        dispatch: &dispatch,
        instruments: &instruments,
        percussion: None,
    };

    let mut pointers = [0u16; 16];
    pointers[0] = 0x2040;

    let mut image = Vec::new();
    for p in pointers {
        image.extend_from_slice(&p.to_le_bytes());
    }
    image.resize(0x40, 0);
    // rev2 note byte: duration index = byte / 14; index 14 is out of range
    image.push(14 * 14 + 3);

    let e = decode_song(
        &image,
        &FormatDecoder::Snes(SnesFormat::new(variant)),
        &psx_params(),
        &tables,
    )
    .unwrap_err();

    assert!(matches!(e, SongError::NoDecodableTracks));
}

#[test]
fn snes_all_voices_unused() {
    let variant = SnesVariant::rev1();
    let (dispatch, instruments) = snes_tables(&variant);
    let tables = SongTables {
        dispatch: &dispatch,
        instruments: &instruments,
        percussion: None,
    };

    // all pointers below the unused-voice threshold
    let image = snes_image(&[0x00ff; 8], None, 0x20, &[0]);

    let e = decode_song(
        &image,
        &FormatDecoder::Snes(SnesFormat::new(SnesVariant::rev1())),
        &psx_params(),
        &tables,
    )
    .unwrap_err();

    assert!(matches!(e, SongError::Format(FormatError::NoActiveVoices)));
}

#[test]
fn snes_rev3_utility_duration_event() {
    let variant = SnesVariant::rev3();
    let (dispatch, instruments) = snes_tables(&variant);
    let tables = SongTables {
        dispatch: &dispatch,
        instruments: &instruments,
        percussion: None,
    };

    let mut pointers = [0u16; 8];
    pointers[0] = 0x2020;

    let image = snes_image(
        &pointers,
        Some(0x2100),
        0x20,
        &[
            decoder::snes::rev3_opcodes::UTILITY_DURATION,
            77,
            15,
            decoder::snes::rev3_opcodes::HALT,
        ],
    );

    let song = decode_song(
        &image,
        &FormatDecoder::Snes(SnesFormat::new(variant)),
        &psx_params(),
        &tables,
    )
    .unwrap();

    let track = &song.tracks[&0];
    assert!(matches!(
        track.events[0].kind,
        IrKind::UtilityDuration { ticks } if ticks == TickCounter::new(77)
    ));
    assert!(matches!(track.events[1].kind, IrKind::Note { class: 1, .. }));
}
