//! Loop-structure analysis of finished tracks

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Runs between decoding and expansion. The facts computed here (does the
//! track loop, where does the loop re-enter, how long are intro and loop)
//! drive the playthrough-length convention: intro plus two loop repetitions.

use crate::ir::{IrKind, LoopInfo, Track};
use crate::time::TickCounter;

// Generous per-track step ceiling for the tick simulation.
const MAX_SIMULATION_STEPS: usize = 250_000;

struct LoopFrame {
    /// Index of the first body event (the one after LoopStart).
    start_index: usize,
    /// Re-entries left at the LoopEnd.
    remaining: u8,
    /// Current iteration, 1-based.
    iteration: u8,
}

/// Derives the loop facts of one decoded track.
///
/// The loop point is the last backward Goto in the event list; its target is
/// resolved by exact byte offset. A backward branch whose target does not
/// land on a decoded instruction is reported but yields no loop timing.
pub fn analyze_track(track: &Track) -> LoopInfo {
    let last_backward = track
        .events
        .iter()
        .enumerate()
        .rev()
        .find(|(_, e)| e.is_backward_goto());

    let (goto_index, goto_target) = match last_backward {
        Some((i, e)) => match e.kind {
            IrKind::Goto { target } => (i, target),
            _ => unreachable!(),
        },
        None => {
            let total = simulate_ticks(track, track.events.len(), None).1;
            return LoopInfo::without_loop(total);
        }
    };

    let target_index = track.index_of_offset(goto_target);

    let Some(target_index) = target_index else {
        log::warn!(
            "track {}: loop target {:#06x} does not land on an instruction",
            track.number,
            goto_target
        );
        let total = simulate_ticks(track, track.events.len(), None).1;
        return LoopInfo {
            has_backward_branch: true,
            intro_ticks: total,
            loop_ticks: TickCounter::ZERO,
            target_index: None,
            target_ticks: total,
        };
    };

    // Simulate up to (and including) the Goto, sampling the clock the first
    // time execution reaches the loop point.
    let (intro, total) = simulate_ticks(track, goto_index, Some(target_index));
    let intro_ticks = intro.unwrap_or(total);
    let loop_ticks = TickCounter::new(total.value().saturating_sub(intro_ticks.value()));

    LoopInfo {
        has_backward_branch: true,
        intro_ticks,
        loop_ticks,
        target_index: Some(target_index),
        target_ticks: intro_ticks + loop_ticks + loop_ticks,
    }
}

/// Tick simulation over `events[..end_index]`, honoring LoopStart/LoopEnd
/// counters and single-shot LoopBreak branches.
///
/// Returns the clock the first time `sample_index` is reached (if given and
/// reached) and the clock at the end of the run.
fn simulate_ticks(track: &Track, end_index: usize, sample_index: Option<usize>) -> (Option<TickCounter>, TickCounter) {
    let mut clock = TickCounter::ZERO;
    let mut sampled = None;

    let mut index = 0;
    let mut stack: Vec<LoopFrame> = Vec::new();
    let mut steps = 0;

    while index < end_index {
        if steps >= MAX_SIMULATION_STEPS {
            log::warn!("track {}: loop simulation step ceiling hit", track.number);
            break;
        }
        steps += 1;

        if sample_index == Some(index) && sampled.is_none() {
            sampled = Some(clock);
        }

        let event = &track.events[index];
        clock += event.ticks();

        match event.kind {
            IrKind::LoopStart { count } => {
                stack.push(LoopFrame {
                    start_index: index + 1,
                    remaining: count.saturating_sub(1),
                    iteration: 1,
                });
            }
            IrKind::LoopEnd => {
                match stack.last_mut() {
                    Some(frame) if frame.remaining > 0 => {
                        frame.remaining -= 1;
                        frame.iteration += 1;
                        index = frame.start_index;
                        continue;
                    }
                    Some(_) => {
                        stack.pop();
                    }
                    // Unmatched LoopEnd: scan entered mid-loop, ignore.
                    None => {}
                }
            }
            IrKind::LoopBreak { condition, target } => {
                let taken = stack.last().map(|f| f.iteration) == Some(condition);
                if taken {
                    stack.pop();
                    if let Some(i) = track.index_of_offset(target) {
                        index = i;
                        continue;
                    }
                    // Break leaves the analyzed region.
                    break;
                }
            }
            _ => {}
        }

        index += 1;
    }

    (sampled, clock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrEvent;

    fn note(offset: u32, ticks: u32) -> IrEvent {
        IrEvent {
            offset,
            raw: vec![0],
            kind: IrKind::Note {
                class: 0,
                ticks: TickCounter::new(ticks),
                instrument: None,
                percussion: false,
            },
        }
    }

    fn event(offset: u32, kind: IrKind) -> IrEvent {
        IrEvent {
            offset,
            raw: vec![0],
            kind,
        }
    }

    #[test]
    fn track_without_branch_has_no_loop() {
        let t = Track::new(0, 0, vec![note(0, 24), note(1, 24), event(2, IrKind::Halt)], vec![]);
        let li = analyze_track(&t);

        assert!(!li.has_backward_branch);
        assert_eq!(li.intro_ticks, TickCounter::new(48));
        assert_eq!(li.loop_ticks, TickCounter::ZERO);
        assert_eq!(li.target_ticks, TickCounter::new(48));
    }

    #[test]
    fn backward_goto_splits_intro_and_loop() {
        // intro: one 24-tick note; loop: two 24-tick notes
        let t = Track::new(
            0,
            0,
            vec![
                note(0, 24),
                note(1, 24),
                note(2, 24),
                event(3, IrKind::Goto { target: 1 }),
            ],
            vec![],
        );
        let li = analyze_track(&t);

        assert!(li.has_backward_branch);
        assert_eq!(li.target_index, Some(1));
        assert_eq!(li.intro_ticks, TickCounter::new(24));
        assert_eq!(li.loop_ticks, TickCounter::new(48));
        // intro + two loop repetitions
        assert_eq!(li.target_ticks, TickCounter::new(120));
    }

    #[test]
    fn loop_counter_repeats_body() {
        // loop_start 3 { 24-tick note } loop_end: body plays three times
        let t = Track::new(
            0,
            0,
            vec![
                event(0, IrKind::LoopStart { count: 3 }),
                note(1, 24),
                event(2, IrKind::LoopEnd),
                event(3, IrKind::Halt),
            ],
            vec![],
        );
        let li = analyze_track(&t);

        assert_eq!(li.intro_ticks, TickCounter::new(72));
    }

    #[test]
    fn loop_break_skips_tail_on_matching_iteration() {
        // loop_start 2 { note(24); break@2 -> after; note(24) } loop_end
        // iteration 1 plays both notes, iteration 2 breaks after the first:
        // three notes total.
        let t = Track::new(
            0,
            0,
            vec![
                event(0, IrKind::LoopStart { count: 2 }),
                note(1, 24),
                event(
                    2,
                    IrKind::LoopBreak {
                        condition: 2,
                        target: 6,
                    },
                ),
                note(3, 24),
                event(4, IrKind::LoopEnd),
                note(6, 24),
                event(7, IrKind::Halt),
            ],
            vec![],
        );
        let li = analyze_track(&t);

        // 24*2 (iter 1) + 24 (iter 2, broken) + 24 (tail)
        assert_eq!(li.intro_ticks, TickCounter::new(96));
    }

    #[test]
    fn unresolved_loop_target_keeps_branch_fact() {
        let t = Track::new(
            0,
            0,
            vec![note(0, 24), event(5, IrKind::Goto { target: 3 })],
            vec![],
        );
        let li = analyze_track(&t);

        assert!(li.has_backward_branch);
        assert_eq!(li.target_index, None);
        assert_eq!(li.loop_ticks, TickCounter::ZERO);
    }
}
