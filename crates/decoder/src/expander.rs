//! Pass-2 expansion of IR tracks into absolutely-timed events

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

//! A small stack machine re-executes the IR: loops repeat, breaks branch,
//! Goto may continue into another track. Sequences loop forever by design,
//! so every run is bounded by governors; hitting one is a normal outcome,
//! not an error.

use crate::format_constants::{
    DEFAULT_FADE_CADENCE_TICKS, DEFAULT_GATE_TICKS, DEFAULT_MAX_EXPANSION_EVENTS,
    DEFAULT_STEPS_PER_EVENT, DEFAULT_WALL_CLOCK_LIMIT_MS, MIDI_CHANNELS, PERCUSSION_CHANNEL,
};
use crate::ir::{InstrumentContext, IrKind, Song, NOTE_CLASSES_PER_OCTAVE};
use crate::time::{to_output_ticks, TickCounter};

use std::time::{Duration, Instant};

use serde::Serialize;

/// How volume and pan fades are rendered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum VolumeFadePolicy {
    /// Interpolated controller events at a fixed cadence.
    DiscreteEvents,
    /// No events: the fade target becomes interpreter state immediately and
    /// shapes the velocity of later notes.
    StateRamp,
}

#[derive(Debug, Clone)]
pub struct ExpanderConfig {
    pub max_events: usize,
    /// Step ceiling is `steps_per_event * IR length`.
    pub steps_per_event: usize,
    pub wall_clock_limit: Duration,

    /// Notes end this many native ticks early unless articulation says
    /// otherwise.
    pub gate_ticks: u32,
    pub fade_cadence_ticks: u64,
    pub fade_policy: VolumeFadePolicy,

    /// Extra scaling applied to every computed velocity.
    pub velocity_scale: f64,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EXPANSION_EVENTS,
            steps_per_event: DEFAULT_STEPS_PER_EVENT,
            wall_clock_limit: Duration::from_millis(DEFAULT_WALL_CLOCK_LIMIT_MS),
            gate_ticks: DEFAULT_GATE_TICKS,
            fade_cadence_ticks: DEFAULT_FADE_CADENCE_TICKS,
            fade_policy: VolumeFadePolicy::DiscreteEvents,
            velocity_scale: 1.0,
        }
    }
}

/// Why the interpreter stopped. Always a normal outcome.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The track halted or branched nowhere.
    TrackEnded,
    TargetReached,
    EventLimit,
    StepLimit,
    WallClock,
}

/// One absolutely-timed output event. Times and durations are output ticks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OutputEvent {
    Note {
        time: u64,
        duration: u64,
        pitch: u8,
        velocity: u8,
        channel: u8,
    },
    ProgramChange {
        time: u64,
        program: u8,
        channel: u8,
    },
    Tempo {
        time: u64,
        bpm: f64,
    },
    Controller {
        time: u64,
        controller: u8,
        value: u8,
        channel: u8,
    },
}

impl OutputEvent {
    pub fn time(&self) -> u64 {
        match self {
            Self::Note { time, .. }
            | Self::ProgramChange { time, .. }
            | Self::Tempo { time, .. }
            | Self::Controller { time, .. } => *time,
        }
    }
}

pub const CC_VOLUME: u8 = 7;
pub const CC_PAN: u8 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct Expansion {
    pub events: Vec<OutputEvent>,
    pub stop: StopReason,
    /// Native ticks elapsed when the interpreter stopped.
    pub native_ticks: u64,
}

struct LoopFrame {
    track: u8,
    start_index: usize,
    remaining: u8,
    iteration: u8,
    /// Octave at LoopStart, restored on every re-entry.
    captured_octave: u8,
}

/// Active volume ramp (StateRamp policy only).
struct VolumeRamp {
    current: f64,
    target: u8,
    per_tick: f64,
    remaining: u32,
}

/// Per-voice interpreter state.
struct VoiceState {
    octave: u8,
    volume: u8,
    /// 0.0 - 1.0, scaled from the multiplier operand.
    multiplier: f64,
    /// 0.0 - 1.0, scaled from the master-volume operand.
    master: f64,
    slur: bool,
    roll: bool,
    staccato_percent: Option<u8>,
    /// One-shot duration override for the next note.
    pending_duration: Option<TickCounter>,
    instrument: Option<InstrumentContext>,
    bpm: f64,
    volume_ramp: Option<VolumeRamp>,
}

impl Default for VoiceState {
    fn default() -> Self {
        Self {
            octave: 4,
            volume: 255,
            multiplier: 0.5,
            master: 1.0,
            slur: false,
            roll: false,
            staccato_percent: None,
            pending_duration: None,
            instrument: None,
            bpm: 120.0,
            volume_ramp: None,
        }
    }
}

impl VoiceState {
    fn velocity(&self, scale: f64) -> u8 {
        let base = f64::from(self.volume >> 1);
        let v = (base * (self.multiplier + 0.5) * self.master * scale).floor();
        v.clamp(0.0, 127.0) as u8
    }

    /// Advances the volume ramp by `ticks` elapsed native ticks.
    fn advance_ramp(&mut self, ticks: u32) {
        if let Some(ramp) = &mut self.volume_ramp {
            let t = ticks.min(ramp.remaining);
            ramp.current += ramp.per_tick * f64::from(t);
            ramp.remaining -= t;

            if ramp.remaining == 0 {
                self.volume = ramp.target;
                self.volume_ramp = None;
            } else {
                self.volume = ramp.current.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Melodic channel for a track, steering clear of the percussion channel.
fn track_channel(track_number: u8) -> u8 {
    let c = track_number % (MIDI_CHANNELS - 1);
    if c >= PERCUSSION_CHANNEL {
        c + 1
    } else {
        c
    }
}

/// Expands one track (following branches wherever they lead) into an
/// absolutely-timed event stream.
///
/// `target_ticks` is the playthrough length in native ticks; zero means "run
/// until a governor stops the interpreter".
pub fn expand(song: &Song, start_track: u8, target_ticks: TickCounter, config: &ExpanderConfig) -> Expansion {
    let Some(track) = song.tracks.get(&start_track) else {
        log::warn!("song {}: no track {}", song.id, start_track);
        return Expansion {
            events: Vec::new(),
            stop: StopReason::TrackEnded,
            native_ticks: 0,
        };
    };

    let max_steps = song.total_events().saturating_mul(config.steps_per_event).max(4096);
    let started = Instant::now();

    let mut events: Vec<OutputEvent> = Vec::new();
    let mut state = VoiceState::default();
    let mut stack: Vec<LoopFrame> = Vec::new();

    let mut current = track;
    let mut channel = track_channel(current.number);
    let mut index = 0usize;
    let mut clock: u64 = 0;
    // Index of the last Note pushed to `events`, for Tie extension.
    let mut last_note: Option<usize> = None;

    let ppqn = song.native_ppqn;
    let mut steps = 0usize;

    let stop = loop {
        if !target_ticks.is_zero() && clock >= u64::from(target_ticks.value()) {
            break StopReason::TargetReached;
        }
        if events.len() >= config.max_events {
            break StopReason::EventLimit;
        }
        if steps >= max_steps {
            break StopReason::StepLimit;
        }
        if steps % 1024 == 0 && started.elapsed() >= config.wall_clock_limit {
            break StopReason::WallClock;
        }
        steps += 1;

        let Some(event) = current.events.get(index) else {
            // Ran off the end of the scanned region.
            break StopReason::TrackEnded;
        };
        index += 1;

        match &event.kind {
            IrKind::Note {
                class,
                ticks,
                instrument,
                percussion,
            } => {
                let ticks = state.pending_duration.take().unwrap_or(*ticks);
                let time = to_output_ticks(clock, ppqn);
                let duration = to_output_ticks(u64::from(sounded_ticks(&state, ticks, config)), ppqn);

                let placed = if *percussion {
                    instrument
                        .and_then(|i| i.percussion_key())
                        .map(|key| (key, PERCUSSION_CHANNEL))
                } else {
                    let inst = instrument.or(state.instrument);
                    let transpose = inst.map(|i| i.transpose_octaves).unwrap_or(0);
                    Some((pitch_of(*class, state.octave, transpose), channel))
                };

                if let Some((pitch, channel)) = placed {
                    last_note = Some(events.len());
                    events.push(OutputEvent::Note {
                        time,
                        duration,
                        pitch,
                        velocity: state.velocity(config.velocity_scale),
                        channel,
                    });
                }
                clock += u64::from(ticks.value());
                state.advance_ramp(ticks.value());
            }
            IrKind::Rest { ticks } => {
                let ticks = state.pending_duration.take().unwrap_or(*ticks);
                last_note = None;
                clock += u64::from(ticks.value());
                state.advance_ramp(ticks.value());
            }
            IrKind::Tie { ticks } => {
                // Extends the previous note; a tie with no note is a rest.
                if let Some(OutputEvent::Note { duration, .. }) = last_note.map(|i| &mut events[i]) {
                    *duration += to_output_ticks(u64::from(ticks.value()), ppqn);
                }
                clock += u64::from(ticks.value());
                state.advance_ramp(ticks.value());
            }

            IrKind::Tempo { bpm } => {
                state.bpm = *bpm;
                events.push(OutputEvent::Tempo {
                    time: to_output_ticks(clock, ppqn),
                    bpm: *bpm,
                });
            }
            IrKind::TempoFade { ticks, target_bpm } => {
                let from = state.bpm;
                state.bpm = *target_bpm;
                emit_fade(
                    &mut events,
                    to_output_ticks(clock, ppqn),
                    to_output_ticks(u64::from(ticks.value()), ppqn),
                    config.fade_cadence_ticks,
                    |time, t| OutputEvent::Tempo {
                        time,
                        bpm: from + (target_bpm - from) * t,
                    },
                );
            }

            IrKind::PatchChange { instrument, .. } => {
                state.instrument = *instrument;
                if let Some(inst) = instrument {
                    if !inst.is_percussion() {
                        if let Ok(program) = u8::try_from(inst.program) {
                            events.push(OutputEvent::ProgramChange {
                                time: to_output_ticks(clock, ppqn),
                                program,
                                channel,
                            });
                        }
                    }
                }
            }

            IrKind::OctaveSet { octave } => state.octave = *octave,
            IrKind::OctaveInc => state.octave = state.octave.saturating_add(1),
            IrKind::OctaveDec => state.octave = state.octave.saturating_sub(1),

            IrKind::Volume { value } => {
                state.volume = *value;
                state.volume_ramp = None;
                if config.fade_policy == VolumeFadePolicy::DiscreteEvents {
                    events.push(OutputEvent::Controller {
                        time: to_output_ticks(clock, ppqn),
                        controller: CC_VOLUME,
                        value: value >> 1,
                        channel,
                    });
                }
            }
            IrKind::VolumeFade { ticks, target } => match config.fade_policy {
                VolumeFadePolicy::DiscreteEvents => {
                    let from = state.volume;
                    state.volume = *target;
                    emit_fade(
                        &mut events,
                        to_output_ticks(clock, ppqn),
                        to_output_ticks(u64::from(ticks.value()), ppqn),
                        config.fade_cadence_ticks,
                        |time, t| OutputEvent::Controller {
                            time,
                            controller: CC_VOLUME,
                            value: lerp_u8(from, *target, t) >> 1,
                            channel,
                        },
                    );
                }
                VolumeFadePolicy::StateRamp => {
                    if ticks.is_zero() {
                        state.volume = *target;
                    } else {
                        let delta = f64::from(*target) - f64::from(state.volume);
                        state.volume_ramp = Some(VolumeRamp {
                            current: f64::from(state.volume),
                            target: *target,
                            per_tick: delta / f64::from(ticks.value()),
                            remaining: ticks.value(),
                        });
                    }
                }
            },
            // The ramp policy is volume-only: pan is always discrete.
            IrKind::Pan { value } => {
                events.push(OutputEvent::Controller {
                    time: to_output_ticks(clock, ppqn),
                    controller: CC_PAN,
                    value: value >> 1,
                    channel,
                });
            }
            IrKind::PanFade { ticks, target } => {
                // Pan has no velocity effect: interpolate from center.
                emit_fade(
                    &mut events,
                    to_output_ticks(clock, ppqn),
                    to_output_ticks(u64::from(ticks.value()), ppqn),
                    config.fade_cadence_ticks,
                    |time, t| OutputEvent::Controller {
                        time,
                        controller: CC_PAN,
                        value: lerp_u8(128, *target, t) >> 1,
                        channel,
                    },
                );
            }

            IrKind::SlurOn => state.slur = true,
            IrKind::SlurOff => state.slur = false,
            IrKind::RollOn => state.roll = true,
            IrKind::RollOff => state.roll = false,
            IrKind::Staccato { percent } => state.staccato_percent = Some(*percent),

            IrKind::UtilityDuration { ticks } => state.pending_duration = Some(*ticks),

            IrKind::MasterVolume { value } => state.master = f64::from(*value) / 255.0,
            IrKind::VolumeMultiplier { value } => state.multiplier = f64::from(*value) / 256.0,

            // Percussion mode is resolved at decode time.
            IrKind::PercussionOn | IrKind::PercussionOff => {}

            IrKind::LoopStart { count } => {
                stack.push(LoopFrame {
                    track: current.number,
                    start_index: index,
                    remaining: count.saturating_sub(1),
                    iteration: 1,
                    captured_octave: state.octave,
                });
            }
            IrKind::LoopEnd => match stack.last_mut() {
                Some(frame) if frame.remaining > 0 => {
                    frame.remaining -= 1;
                    frame.iteration += 1;
                    state.octave = frame.captured_octave;
                    if frame.track != current.number {
                        current = &song.tracks[&frame.track];
                        channel = track_channel(current.number);
                    }
                    index = frame.start_index;
                }
                Some(_) => {
                    stack.pop();
                }
                None => {}
            },
            IrKind::LoopBreak { condition, target } => {
                if stack.last().map(|f| f.iteration) == Some(*condition) {
                    stack.pop();
                    match song.resolve_offset(*target) {
                        Some((t, i)) => {
                            if t != current.number {
                                current = &song.tracks[&t];
                                channel = track_channel(current.number);
                            }
                            index = i;
                        }
                        None => {
                            log::warn!(
                                "song {}: loop break target {:#06x} unresolved",
                                song.id,
                                target
                            );
                            break StopReason::TrackEnded;
                        }
                    }
                }
            }
            IrKind::LoopMark => {}

            IrKind::Goto { target } => match song.resolve_offset(*target) {
                Some((t, i)) => {
                    if t != current.number {
                        current = &song.tracks[&t];
                        channel = track_channel(current.number);
                    }
                    index = i;
                }
                None => {
                    log::warn!("song {}: goto target {:#06x} unresolved", song.id, target);
                    break StopReason::TrackEnded;
                }
            },
            IrKind::Halt => break StopReason::TrackEnded,

            IrKind::Envelope | IrKind::Nop => {}
        }
    };

    log::info!(
        "song {} track {}: expanded {} events over {} native ticks ({:?})",
        song.id,
        start_track,
        events.len(),
        clock,
        stop
    );

    // Scheduled fade events may postdate later notes.
    events.sort_by_key(OutputEvent::time);

    Expansion {
        events,
        stop,
        native_ticks: clock,
    }
}

/// Sounded duration of a note, after articulation.
///
/// Slur and roll sound the full duration; staccato scales it; otherwise the
/// configured gate shortens it. Always at least one tick.
fn sounded_ticks(state: &VoiceState, ticks: TickCounter, config: &ExpanderConfig) -> u32 {
    let full = ticks.value();

    let sounded = if state.slur || state.roll {
        full
    } else if let Some(percent) = state.staccato_percent {
        full * u32::from(percent) / 100
    } else {
        full.saturating_sub(config.gate_ticks)
    };

    sounded.max(1)
}

/// Absolute pitch, clamped to the 0-127 range.
fn pitch_of(class: u8, octave: u8, transpose_octaves: i8) -> u8 {
    let pitch = i32::from(octave) * i32::from(NOTE_CLASSES_PER_OCTAVE) + i32::from(class)
        + i32::from(transpose_octaves) * i32::from(NOTE_CLASSES_PER_OCTAVE);

    pitch.clamp(0, 127) as u8
}

fn lerp_u8(from: u8, to: u8, t: f64) -> u8 {
    let v = f64::from(from) + (f64::from(to) - f64::from(from)) * t;
    v.round().clamp(0.0, 255.0) as u8
}

/// Emits interpolated events at `cadence`-tick intervals over `length`,
/// always ending with an exact-target event at `start + length`.
fn emit_fade(
    events: &mut Vec<OutputEvent>,
    start: u64,
    length: u64,
    cadence: u64,
    make: impl Fn(u64, f64) -> OutputEvent,
) {
    if length == 0 {
        events.push(make(start, 1.0));
        return;
    }

    let cadence = cadence.max(1);
    let mut at = start;
    while at < start + length {
        let t = (at - start) as f64 / length as f64;
        events.push(make(at, t));
        at += cadence;
    }
    events.push(make(start + length, 1.0));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_formula_identities() {
        let s = VoiceState::default();
        // full volume, neutral multiplier and master
        assert_eq!(s.velocity(1.0), 127);

        let s = VoiceState {
            volume: 128,
            ..VoiceState::default()
        };
        assert_eq!(s.velocity(1.0), 64);
    }

    #[test]
    fn velocity_clamps_at_127() {
        let s = VoiceState {
            volume: 255,
            multiplier: 1.0,
            ..VoiceState::default()
        };
        assert_eq!(s.velocity(1.0), 127);
    }

    #[test]
    fn melodic_channels_skip_percussion() {
        for n in 0..64 {
            assert_ne!(track_channel(n), PERCUSSION_CHANNEL);
            assert!(track_channel(n) < MIDI_CHANNELS);
        }
    }

    #[test]
    fn fade_ends_on_exact_target() {
        let mut events = Vec::new();
        emit_fade(&mut events, 0, 10, 4, |time, t| OutputEvent::Controller {
            time,
            controller: CC_VOLUME,
            value: lerp_u8(0, 100, t),
            channel: 0,
        });

        let last = events.last().unwrap();
        assert_eq!(last.time(), 10);
        match last {
            OutputEvent::Controller { value, .. } => assert_eq!(*value, 100),
            _ => unreachable!(),
        }
    }
}
