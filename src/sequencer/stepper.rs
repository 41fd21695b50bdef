use super::clock::ClockSnapshot;
use super::STEPS;
use crate::params::ControlMode;

/// One tick per eighth note
pub const TICK_BEATS: f64 = 0.5;
pub const NOTE_VELOCITY: u8 = 100;
/// The beat lane is emitted as `32 + sequencePosition`
pub const BEAT_NOTE_BASE: u8 = 32;

/// Requests gathered from control input, consumed at the next tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PendingFlags {
    pub sequence_reset: bool,
    pub soft_reset: bool,
    pub hard_reset: bool,
    pub new_note: bool,
    pub last_received_note: u8,
}

/// What happened at one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub offset: usize,
    pub sequence_position: usize,
    pub note_sequence_position: usize,
    pub notes: (u8, u8),
}

/// Receives the output of the tick loop
pub trait StepEvents {
    fn note_on(&mut self, offset: usize, note: u8, velocity: u8);
    fn note_off(&mut self, offset: usize, note: u8);
    fn delay_time_changed(&mut self, steps: u8);
    fn tick(&mut self, tick: &Tick);
}

/// Sixteen-step position counters advanced on eighth-note boundaries.
///
/// Owned by the audio thread. Control input reaches it only through
/// [`PendingFlags`] and [`set_note_position`](Self::set_note_position).
pub struct SequencerState {
    /// Step the next tick will sound
    pub sequence_position: usize,
    pub note_sequence_position: usize,
    /// Step the last tick sounded
    pub current_position: usize,
    pub current_note_position: usize,
    pub next_tick_phase: f64,
    pub last_emitted: Option<(u8, u8)>,
    pub waveform_rotation: usize,
    pub samples_to_next_tick: f64,
    /// Beats the tick grid runs ahead of the eighth-note grid, below one tick
    grid_offset: f64,
    /// Beats the pending tick was pushed later by a phase adjust; cleared when it fires
    postponed: f64,
    synced: bool,
}

/// First eighth-note boundary at or after `beats`
pub fn snap_to_grid(beats: f64) -> f64 {
    (beats * 2.0).ceil() / 2.0
}

impl SequencerState {
    pub fn new() -> Self {
        Self {
            sequence_position: 0,
            note_sequence_position: 0,
            current_position: 0,
            current_note_position: 0,
            next_tick_phase: 0.0,
            last_emitted: None,
            waveform_rotation: 0,
            samples_to_next_tick: 0.0,
            grid_offset: 0.0,
            postponed: 0.0,
            synced: false,
        }
    }

    /// Note override from an incoming trigger
    pub fn set_note_position(&mut self, note: u8) {
        self.note_sequence_position = note as usize % STEPS;
    }

    /// Put the next tick on the first shifted boundary at or after `start`
    fn resnap(&mut self, start: f64) {
        self.next_tick_phase = snap_to_grid(start + self.grid_offset) - self.grid_offset;
        self.postponed = 0.0;
    }

    /// Move the grid `beats` earlier (negative: later). Boundaries that fall
    /// behind `start` are skipped, except the one closest to `start`, which
    /// fires at offset 0.
    fn shift_grid(&mut self, beats: f64, start: f64) {
        self.grid_offset = (self.grid_offset + beats).rem_euclid(TICK_BEATS);
        self.next_tick_phase -= beats;
        self.postponed = (self.postponed - beats).max(0.0);
        if self.next_tick_phase + TICK_BEATS <= start {
            let missed = ((start - self.next_tick_phase) / TICK_BEATS).floor();
            self.next_tick_phase += missed * TICK_BEATS;
        }
    }

    /// Send note-offs for whatever pair is still sounding
    pub fn release_notes(&mut self, offset: usize, events: &mut impl StepEvents) {
        if let Some((a, b)) = self.last_emitted.take() {
            events.note_off(offset, a);
            events.note_off(offset, b);
        }
    }

    /// Walk the block's beat window and fire every tick it crosses.
    ///
    /// `phase_shift_beats` moves the tick grid earlier by that many beats.
    /// Returns the number of ticks fired.
    #[allow(clippy::too_many_arguments)]
    pub fn advance(
        &mut self,
        clock: &ClockSnapshot,
        block_len: usize,
        sample_rate: f64,
        flags: &mut PendingFlags,
        control_mode: ControlMode,
        phase_shift_beats: f64,
        events: &mut impl StepEvents,
    ) -> usize {
        if !clock.playing {
            self.release_notes(0, events);
            return 0;
        }
        if block_len == 0 {
            return 0;
        }

        let beats_per_sample = clock.beats_per_sample(sample_rate);
        let start = clock.position_beats;
        let end = start + block_len as f64 * beats_per_sample;

        // First block, loop-back, relocation or a resumed transport. A tick
        // postponed by a phase adjust is not a backward jump.
        if !self.synced
            || start < self.next_tick_phase - self.postponed - TICK_BEATS
            || start > self.next_tick_phase + TICK_BEATS
        {
            self.resnap(start);
            self.synced = true;
        }
        if phase_shift_beats != 0.0 {
            self.shift_grid(phase_shift_beats, start);
        }

        let mut ticks = 0;
        while self.next_tick_phase < end {
            if flags.hard_reset {
                flags.hard_reset = false;
                self.sequence_position = 0;
                self.note_sequence_position = 0;
                self.release_notes(0, events);
                self.resnap(start);
                if self.next_tick_phase >= end {
                    break;
                }
            }

            let offset = (((self.next_tick_phase - start) / beats_per_sample).max(0.0) as usize)
                .min(block_len - 1);

            if flags.sequence_reset {
                flags.sequence_reset = false;
                self.note_sequence_position = self.sequence_position;
                events.delay_time_changed(0);
            }
            if flags.soft_reset {
                flags.soft_reset = false;
                self.waveform_rotation = self.sequence_position;
                self.sequence_position = 0;
                self.note_sequence_position = 0;
            }
            if flags.new_note {
                flags.new_note = false;
                if control_mode == ControlMode::Internal {
                    let diff = self.sequence_position as i32 - flags.last_received_note as i32;
                    let steps = STEPS as i32;
                    events.delay_time_changed(((diff % steps + steps) % steps) as u8);
                }
            }

            self.release_notes(offset, events);
            let notes = (
                self.note_sequence_position as u8,
                BEAT_NOTE_BASE + self.sequence_position as u8,
            );
            events.note_on(offset, notes.0, NOTE_VELOCITY);
            events.note_on(offset, notes.1, NOTE_VELOCITY);
            self.last_emitted = Some(notes);
            events.tick(&Tick {
                offset,
                sequence_position: self.sequence_position,
                note_sequence_position: self.note_sequence_position,
                notes,
            });

            self.current_position = self.sequence_position;
            self.current_note_position = self.note_sequence_position;
            self.sequence_position = (self.sequence_position + 1) % STEPS;
            self.note_sequence_position = (self.note_sequence_position + 1) % STEPS;
            self.next_tick_phase += TICK_BEATS;
            ticks += 1;
        }

        if ticks > 0 {
            self.postponed = 0.0;
        }
        self.samples_to_next_tick = ((self.next_tick_phase - end) / beats_per_sample).max(0.0);
        ticks
    }
}

impl Default for SequencerState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::ClockMode;

    const SR: f64 = 44100.0;
    const BLOCK: usize = 512;

    #[derive(Debug, Clone, PartialEq)]
    enum Ev {
        On(usize, u8),
        Off(usize, u8),
        Delay(u8),
        Tick(Tick),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Ev>,
    }

    impl Recorder {
        fn ticks(&self) -> Vec<Tick> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Ev::Tick(t) => Some(*t),
                    _ => None,
                })
                .collect()
        }

        fn delays(&self) -> Vec<u8> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Ev::Delay(d) => Some(*d),
                    _ => None,
                })
                .collect()
        }
    }

    impl StepEvents for Recorder {
        fn note_on(&mut self, offset: usize, note: u8, _velocity: u8) {
            self.events.push(Ev::On(offset, note));
        }
        fn note_off(&mut self, offset: usize, note: u8) {
            self.events.push(Ev::Off(offset, note));
        }
        fn delay_time_changed(&mut self, steps: u8) {
            self.events.push(Ev::Delay(steps));
        }
        fn tick(&mut self, tick: &Tick) {
            self.events.push(Ev::Tick(*tick));
        }
    }

    fn clock(bpm: f64, position_beats: f64) -> ClockSnapshot {
        ClockSnapshot {
            bpm,
            position_beats,
            playing: true,
            source: ClockMode::Host,
        }
    }

    fn block_start(block: usize) -> f64 {
        block as f64 * BLOCK as f64 * 120.0 / (60.0 * SR)
    }

    fn run_blocks(
        seq: &mut SequencerState,
        flags: &mut PendingFlags,
        rec: &mut Recorder,
        from: usize,
        to: usize,
    ) {
        for b in from..to {
            seq.advance(
                &clock(120.0, block_start(b)),
                BLOCK,
                SR,
                flags,
                ControlMode::Internal,
                0.0,
                rec,
            );
        }
    }

    #[test]
    fn positions_wrap_within_sixteen_steps() {
        let mut seq = SequencerState::new();
        let mut flags = PendingFlags::default();
        let mut rec = Recorder::default();
        run_blocks(&mut seq, &mut flags, &mut rec, 0, 2000);
        let ticks = rec.ticks();
        assert!(ticks.len() > 32);
        for (i, t) in ticks.iter().enumerate() {
            assert_eq!(t.sequence_position, i % STEPS);
            assert!(t.note_sequence_position < STEPS);
        }
        assert!(seq.sequence_position < STEPS);
    }

    #[test]
    fn current_position_is_the_step_that_last_sounded() {
        let mut seq = SequencerState::new();
        let mut flags = PendingFlags::default();
        let mut rec = Recorder::default();
        run_blocks(&mut seq, &mut flags, &mut rec, 0, 300);
        let last = *rec.ticks().last().unwrap();
        assert_eq!(seq.current_position, last.sequence_position);
        assert_eq!(seq.current_note_position, last.note_sequence_position);
        assert_eq!(seq.sequence_position, (last.sequence_position + 1) % STEPS);
    }

    #[test]
    fn ticks_land_on_exact_sample_offsets() {
        let mut seq = SequencerState::new();
        let mut flags = PendingFlags::default();
        let blocks = 200;
        let beats_per_sample = 120.0 / (60.0 * SR);
        let mut fired = Vec::new();
        for b in 0..blocks {
            let mut rec = Recorder::default();
            let start = block_start(b);
            seq.advance(
                &clock(120.0, start),
                BLOCK,
                SR,
                &mut flags,
                ControlMode::Internal,
                0.0,
                &mut rec,
            );
            for t in rec.ticks() {
                fired.push((b, t.offset));
            }
        }
        let end = block_start(blocks);
        let expected: Vec<(usize, usize)> = (0..)
            .map(|k| k as f64 * TICK_BEATS)
            .take_while(|phase| *phase < end)
            .map(|phase| {
                let b = (0..blocks).rev().find(|b| block_start(*b) <= phase).unwrap_or(0);
                (b, ((phase - block_start(b)) / beats_per_sample) as usize)
            })
            .collect();
        assert_eq!(fired, expected);
    }

    #[test]
    fn new_note_sets_delay_from_position_difference() {
        let mut seq = SequencerState::new();
        seq.sequence_position = 5;
        let mut flags = PendingFlags {
            new_note: true,
            last_received_note: 9,
            ..Default::default()
        };
        let mut rec = Recorder::default();
        seq.advance(&clock(120.0, 0.0), BLOCK, SR, &mut flags, ControlMode::Internal, 0.0, &mut rec);
        assert_eq!(rec.delays(), vec![12]);
        assert!(!flags.new_note);
    }

    #[test]
    fn osc_control_mode_leaves_delay_alone() {
        let mut seq = SequencerState::new();
        let mut flags = PendingFlags {
            new_note: true,
            last_received_note: 3,
            ..Default::default()
        };
        let mut rec = Recorder::default();
        seq.advance(&clock(120.0, 0.0), BLOCK, SR, &mut flags, ControlMode::Osc, 0.0, &mut rec);
        assert!(rec.delays().is_empty());
        assert!(!flags.new_note);
    }

    #[test]
    fn emits_note_pair_and_releases_previous_on_next_tick() {
        let mut seq = SequencerState::new();
        seq.note_sequence_position = 4;
        let mut flags = PendingFlags::default();
        let mut rec = Recorder::default();
        // Two ticks inside one block: phase 0.0 and 0.5
        seq.advance(&clock(120.0, 0.0), 12000, SR, &mut flags, ControlMode::Internal, 0.0, &mut rec);
        let second = (0.5 / (120.0 / (60.0 * SR))) as usize;
        assert_eq!(
            rec.events,
            vec![
                Ev::On(0, 4),
                Ev::On(0, 32),
                Ev::Tick(Tick {
                    offset: 0,
                    sequence_position: 0,
                    note_sequence_position: 4,
                    notes: (4, 32)
                }),
                Ev::Off(second, 4),
                Ev::Off(second, 32),
                Ev::On(second, 5),
                Ev::On(second, 33),
                Ev::Tick(Tick {
                    offset: second,
                    sequence_position: 1,
                    note_sequence_position: 5,
                    notes: (5, 33)
                }),
            ]
        );
    }

    #[test]
    fn hard_reset_cancels_notes_at_block_start() {
        let mut seq = SequencerState::new();
        let mut flags = PendingFlags::default();
        let mut rec = Recorder::default();
        run_blocks(&mut seq, &mut flags, &mut rec, 0, 100);
        assert!(seq.last_emitted.is_some());

        // Find a block that contains a tick
        let mut b = 100;
        loop {
            let start = block_start(b);
            if snap_to_grid(start) < block_start(b + 1) {
                break;
            }
            b += 1;
        }
        let sounding = seq.last_emitted.unwrap();
        flags.hard_reset = true;
        let mut rec = Recorder::default();
        seq.advance(&clock(120.0, block_start(b)), BLOCK, SR, &mut flags, ControlMode::Internal, 0.0, &mut rec);
        assert_eq!(rec.events[0], Ev::Off(0, sounding.0));
        assert_eq!(rec.events[1], Ev::Off(0, sounding.1));
        let ticks = rec.ticks();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].notes, (0, 32));
        assert!(!flags.hard_reset);
    }

    #[test]
    fn sequence_reset_aligns_note_lane_and_clears_delay() {
        let mut seq = SequencerState::new();
        seq.sequence_position = 7;
        seq.note_sequence_position = 2;
        let mut flags = PendingFlags {
            sequence_reset: true,
            ..Default::default()
        };
        let mut rec = Recorder::default();
        seq.advance(&clock(120.0, 0.0), BLOCK, SR, &mut flags, ControlMode::Internal, 0.0, &mut rec);
        assert_eq!(rec.delays(), vec![0]);
        assert_eq!(rec.ticks()[0].notes, (7, 39));
    }

    #[test]
    fn soft_reset_remembers_rotation() {
        let mut seq = SequencerState::new();
        seq.sequence_position = 11;
        seq.note_sequence_position = 6;
        let mut flags = PendingFlags {
            soft_reset: true,
            ..Default::default()
        };
        let mut rec = Recorder::default();
        seq.advance(&clock(120.0, 0.0), BLOCK, SR, &mut flags, ControlMode::Internal, 0.0, &mut rec);
        assert_eq!(seq.waveform_rotation, 11);
        assert_eq!(rec.ticks()[0].notes, (0, 32));
    }

    #[test]
    fn repeated_soft_reset_requests_collapse() {
        let run = |requests: usize| {
            let mut seq = SequencerState::new();
            seq.sequence_position = 9;
            let mut flags = PendingFlags::default();
            for _ in 0..requests {
                flags.soft_reset = true;
            }
            let mut rec = Recorder::default();
            seq.advance(&clock(120.0, 0.0), BLOCK, SR, &mut flags, ControlMode::Internal, 0.0, &mut rec);
            (seq.sequence_position, seq.note_sequence_position, seq.waveform_rotation, rec.events)
        };
        assert_eq!(run(1), run(2));
    }

    #[test]
    fn backward_jump_resnaps_grid() {
        let mut seq = SequencerState::new();
        let mut flags = PendingFlags::default();
        let mut rec = Recorder::default();
        run_blocks(&mut seq, &mut flags, &mut rec, 0, 200);
        assert!(seq.next_tick_phase > 4.0);

        let mut rec = Recorder::default();
        let start = 1.1;
        seq.advance(&clock(120.0, start), 20000, SR, &mut flags, ControlMode::Internal, 0.0, &mut rec);
        let ticks = rec.ticks();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].offset, ((1.5 - start) / (120.0 / (60.0 * SR))) as usize);
    }

    #[test]
    fn forward_relocation_does_not_burst() {
        let mut seq = SequencerState::new();
        let mut flags = PendingFlags::default();
        let mut rec = Recorder::default();
        run_blocks(&mut seq, &mut flags, &mut rec, 0, 10);
        let mut rec = Recorder::default();
        seq.advance(&clock(120.0, 500.0), BLOCK, SR, &mut flags, ControlMode::Internal, 0.0, &mut rec);
        assert!(rec.ticks().len() <= 1);
    }

    #[test]
    fn stopping_releases_sounding_notes() {
        let mut seq = SequencerState::new();
        let mut flags = PendingFlags::default();
        let mut rec = Recorder::default();
        run_blocks(&mut seq, &mut flags, &mut rec, 0, 10);
        let sounding = seq.last_emitted.unwrap();

        let mut rec = Recorder::default();
        let mut stopped = clock(120.0, 1.0);
        stopped.playing = false;
        let fired = seq.advance(&stopped, BLOCK, SR, &mut flags, ControlMode::Internal, 0.0, &mut rec);
        assert_eq!(fired, 0);
        assert_eq!(rec.events, vec![Ev::Off(0, sounding.0), Ev::Off(0, sounding.1)]);
        assert!(seq.last_emitted.is_none());
    }

    /// Ticks fired over `blocks` blocks at 120 BPM, with `shift` beats applied at `shift_block`
    fn run_with_shift(shift_block: usize, shift: f64, blocks: usize) -> Vec<(usize, Tick)> {
        let mut seq = SequencerState::new();
        let mut flags = PendingFlags::default();
        let mut fired = Vec::new();
        for b in 0..blocks {
            let mut rec = Recorder::default();
            let shift = if b == shift_block { shift } else { 0.0 };
            seq.advance(
                &clock(120.0, block_start(b)),
                BLOCK,
                SR,
                &mut flags,
                ControlMode::Internal,
                shift,
                &mut rec,
            );
            fired.extend(rec.ticks().into_iter().map(|t| (b, t)));
        }
        fired
    }

    fn tick_beats(block: usize, tick: &Tick) -> f64 {
        block_start(block) + tick.offset as f64 * 120.0 / (60.0 * SR)
    }

    #[test]
    fn large_forward_shift_skips_missed_ticks() {
        // 2000 ms at 120 BPM
        let fired = run_with_shift(20, 4.0, 400);
        let in_shift_block: Vec<_> = fired.iter().filter(|(b, _)| *b == 20).collect();
        assert_eq!(in_shift_block.len(), 1);
        assert_eq!(in_shift_block[0].1.offset, 0);

        for pair in fired.windows(2) {
            assert_ne!(pair[0].0, pair[1].0, "two ticks in block {}", pair[1].0);
        }
        for (i, (_, tick)) in fired.iter().enumerate() {
            assert_eq!(tick.sequence_position, i % STEPS);
        }
    }

    #[test]
    fn large_backward_shift_postpones_the_grid() {
        let plain = run_with_shift(20, 0.0, 400);
        let later = run_with_shift(20, -4.0, 400);
        assert_ne!(plain, later);

        // The tick due at beat 0.5 now lands at 4.5, and nothing fires in between
        let (b, first) = later.iter().find(|(b, _)| *b > 0).copied().unwrap();
        assert!((tick_beats(b, &first) - 4.5).abs() < 1e-3);
        assert_eq!(first.sequence_position, 1);

        // The shifted grid is kept: ticks keep coming every half beat
        let after: Vec<f64> = later
            .iter()
            .filter(|(b, _)| *b > 0)
            .map(|(b, t)| tick_beats(*b, t))
            .collect();
        assert!(after.len() > 4);
        for pair in after.windows(2) {
            assert!((pair[1] - pair[0] - TICK_BEATS).abs() < 1e-3);
        }
    }

    #[test]
    fn sub_tick_shift_survives_a_resnap() {
        let mut seq = SequencerState::new();
        let mut flags = PendingFlags::default();
        let mut rec = Recorder::default();
        run_blocks(&mut seq, &mut flags, &mut rec, 0, 10);
        seq.advance(&clock(120.0, block_start(10)), BLOCK, SR, &mut flags, ControlMode::Internal, 0.1, &mut rec);

        // Jump far ahead: the grid re-snaps but stays 0.1 beat early
        let mut rec = Recorder::default();
        seq.advance(&clock(120.0, 100.05), 44100, SR, &mut flags, ControlMode::Internal, 0.0, &mut rec);
        let first = rec.ticks()[0];
        let beats = 100.05 + first.offset as f64 * 120.0 / (60.0 * SR);
        assert!((beats - 100.4).abs() < 1e-3);
    }

    #[test]
    fn phase_shift_moves_ticks_earlier() {
        let mut plain = SequencerState::new();
        let mut shifted = SequencerState::new();
        let mut flags = PendingFlags::default();
        let mut rec = Recorder::default();
        plain.advance(&clock(120.0, 0.1), 44100, SR, &mut flags, ControlMode::Internal, 0.0, &mut rec);
        let mut rec_shift = Recorder::default();
        shifted.advance(&clock(120.0, 0.1), 44100, SR, &mut flags, ControlMode::Internal, 0.1, &mut rec_shift);
        let a = rec.ticks()[0].offset;
        let b = rec_shift.ticks()[0].offset;
        assert!(b < a);
    }
}
