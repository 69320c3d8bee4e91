//! Song-level orchestration: decode every track, analyze, expand

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use crate::decode::{FormatDecoder, SongParams, SongTables};
use crate::errors::SongError;
use crate::expander::{expand, ExpanderConfig, OutputEvent, StopReason};
use crate::ir::{Song, Track};
use crate::loop_analysis::analyze_track;
use crate::source::SequenceSource;
use crate::time::TickCounter;

use std::collections::BTreeMap;

use serde::Serialize;

/// Decodes every active track of one song.
///
/// A track that fails to decode is logged and skipped; the song only fails
/// when no track decodes at all.
pub fn decode_song(
    data: &[u8],
    decoder: &FormatDecoder,
    params: &SongParams,
    tables: &SongTables,
) -> Result<Song, SongError> {
    let header = decoder.parse_header(data, params)?;
    let offsets = header.track_offsets();

    // Every track start is a scan boundary for the others.
    let boundaries = offsets.clone();

    let mut tracks = BTreeMap::new();
    for (number, &offset) in offsets.iter().enumerate() {
        let number = number as u8;

        match decoder.decode_track(data, &header, offset, number, tables, &boundaries) {
            Ok((disassembly, events)) => {
                let mut track = Track::new(number, offset, events, disassembly);
                track.loop_info = Some(analyze_track(&track));
                tracks.insert(number, track);
            }
            Err(e) => {
                log::warn!("song {} track {}: {}", params.song_id, number, e);
            }
        }
    }

    if tracks.is_empty() {
        return Err(SongError::NoDecodableTracks);
    }

    Ok(Song {
        id: params.song_id,
        title: params.title.clone(),
        native_ppqn: header.native_ppqn(),
        tracks,
    })
}

/// `decode_song` over a byte-range of a disc/ROM image.
pub fn decode_song_from_source(
    source: &impl SequenceSource,
    offset: u64,
    length: usize,
    decoder: &FormatDecoder,
    params: &SongParams,
    tables: &SongTables,
) -> Result<Song, SongError> {
    let data = source.read(offset, length)?;
    decode_song(data, decoder, params, tables)
}

/// All tracks of one song expanded to a common playthrough length.
#[derive(Debug, Clone, Serialize)]
pub struct SongExpansion {
    /// Merged event stream, ordered by time.
    pub events: Vec<OutputEvent>,
    pub track_stops: BTreeMap<u8, StopReason>,
    /// Playthrough length in native ticks.
    pub target_ticks: TickCounter,
}

/// Expands every track to the song's playthrough length and merges the
/// per-track streams.
pub fn expand_song(song: &Song, config: &ExpanderConfig) -> SongExpansion {
    let target_ticks = song.target_ticks();

    let mut events = Vec::new();
    let mut track_stops = BTreeMap::new();

    for &number in song.tracks.keys() {
        let expansion = expand(song, number, target_ticks, config);
        track_stops.insert(number, expansion.stop);
        events.extend(expansion.events);
    }

    events.sort_by_key(OutputEvent::time);

    SongExpansion {
        events,
        track_stops,
        target_ticks,
    }
}

pub fn decode_and_expand(
    data: &[u8],
    decoder: &FormatDecoder,
    params: &SongParams,
    tables: &SongTables,
    config: &ExpanderConfig,
) -> Result<(Song, SongExpansion), SongError> {
    let song = decode_song(data, decoder, params, tables)?;
    let expansion = expand_song(&song, config);
    Ok((song, expansion))
}
