use super::buffer::BufferReader;
use super::published::EngineSnapshot;
use super::sample::{LoadedSample, SampleSlots};
use crate::sequencer::clock::sanitize_bpm;
use crate::sequencer::STEPS;

pub const POINTS_PER_STEP: usize = 32;
pub const WAVEFORM_LEN: usize = STEPS * POINTS_PER_STEP;

pub type Waveform = [f32; WAVEFORM_LEN];

/// Per-step peaks from the recording history.
///
/// The step being recorded is left at zero. Every other step is located by
/// how many steps ago it started, counted back from the write cursor.
pub fn extract_live(snapshot: &EngineSnapshot, sample_rate: f64, reader: &BufferReader) -> Waveform {
    let mut out = [0.0; WAVEFORM_LEN];
    let capacity = reader.capacity();
    let samples_per_step = 60.0 / sanitize_bpm(snapshot.bpm) / 2.0 * sample_rate;
    let elapsed = (samples_per_step - snapshot.samples_to_next_beat).clamp(0.0, samples_per_step);
    let current = snapshot.sequence_position % STEPS;
    let stride = samples_per_step / POINTS_PER_STEP as f64;

    for step in 0..STEPS {
        if step == current {
            continue;
        }
        let steps_ago = (current + STEPS - step) % STEPS;
        let start_ago = elapsed + steps_ago as f64 * samples_per_step;
        for (p, slot) in out[step * POINTS_PER_STEP..(step + 1) * POINTS_PER_STEP]
            .iter_mut()
            .enumerate()
        {
            let ago = (start_ago - p as f64 * stride).round() as usize % capacity;
            let index = (snapshot.write_cursor + capacity - ago) % capacity;
            *slot = reader.read_mono(index).abs();
        }
    }
    out
}

/// Per-step peaks of a static sample, rotated by the last soft reset
pub fn extract_static(sample: &LoadedSample, rotation: usize) -> Waveform {
    let mut out = [0.0; WAVEFORM_LEN];
    let segment = sample.len() as f64 / STEPS as f64;
    let stride = segment / POINTS_PER_STEP as f64;
    for step in 0..STEPS {
        let source = (step + rotation) % STEPS;
        for p in 0..POINTS_PER_STEP {
            let index = (source as f64 * segment + p as f64 * stride) as usize;
            out[step * POINTS_PER_STEP + p] = sample.mono_at(index).abs();
        }
    }
    out
}

/// Waveform for whichever source is feeding the chopper
pub fn extract(
    snapshot: &EngineSnapshot,
    sample_rate: f64,
    reader: &BufferReader,
    samples: &SampleSlots,
) -> Waveform {
    if snapshot.sample_active {
        if let Some(w) = samples.with_active(|s| extract_static(s, snapshot.waveform_rotation)) {
            return w;
        }
    }
    extract_live(snapshot, sample_rate, reader)
}
