use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::{bail, Context, Result};
use parking_lot::{Mutex, RwLock};

use crate::sequencer::clock::MIN_BPM;

/// Loops shipped with the chopper, looked up in the sample directories
pub const BUILT_IN_SAMPLES: [&str; 4] = ["amen140.wav", "amen160.wav", "amen180.wav", "amen200.wav"];

const MAX_DETECTED_BPM: f64 = 300.0;

/// Decoded stereo audio ready for phase-locked playback
pub struct LoadedSample {
    pub name: String,
    pub source_rate: u32,
    /// Tempo parsed from the file name, if any
    pub tempo: Option<f64>,
    channels: [Vec<f32>; 2],
}

impl LoadedSample {
    pub fn from_channels(name: &str, source_rate: u32, mut left: Vec<f32>, mut right: Vec<f32>) -> Self {
        let len = left.len().min(right.len());
        left.truncate(len);
        right.truncate(len);
        Self {
            name: name.to_string(),
            source_rate,
            tempo: tempo_from_name(name),
            channels: [left, right],
        }
    }

    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Linear-interpolated frame at a fractional position, wrapping at the end
    pub fn frame_at(&self, position: f64) -> (f32, f32) {
        let len = self.len();
        if len == 0 {
            return (0.0, 0.0);
        }
        let pos = position.rem_euclid(len as f64);
        let i0 = (pos as usize).min(len - 1);
        let i1 = (i0 + 1) % len;
        let frac = (pos - i0 as f64) as f32;
        let [l, r] = &self.channels;
        (
            l[i0] + (l[i1] - l[i0]) * frac,
            r[i0] + (r[i1] - r[i0]) * frac,
        )
    }

    pub fn mono_at(&self, index: usize) -> f32 {
        let len = self.len();
        if len == 0 {
            return 0.0;
        }
        let i = index % len;
        (self.channels[0][i] + self.channels[1][i]) * 0.5
    }
}

/// First run of digits in the name, accepted when it is a plausible tempo
pub fn tempo_from_name(name: &str) -> Option<f64> {
    let digits: String = name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let bpm: f64 = digits.parse().ok()?;
    (MIN_BPM..=MAX_DETECTED_BPM).contains(&bpm).then_some(bpm)
}

/// Decode WAV data into stereo f32. Mono is duplicated, extra channels dropped.
pub fn decode_wav<R: Read>(reader: hound::WavReader<R>, name: &str) -> Result<LoadedSample> {
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        bail!("WAV has no channels: {}", name);
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                bail!("Unsupported bit depth {} in {}", spec.bits_per_sample, name);
            }
            let max_val = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("Failed to decode {}", name))?
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("Failed to decode {}", name))?,
    };

    if samples.len() < channels {
        bail!("WAV file is empty: {}", name);
    }

    let frames = samples.len() / channels;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in samples.chunks_exact(channels) {
        left.push(frame[0]);
        right.push(if channels > 1 { frame[1] } else { frame[0] });
    }

    Ok(LoadedSample::from_channels(name, spec.sample_rate, left, right))
}

pub fn load_wav(path: &Path) -> Result<LoadedSample> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV: {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    decode_wav(reader, &name)
}

/// Get the global samples directory (~/.amenchop/samples/)
pub fn samples_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".amenchop")
        .join("samples")
}

/// Project-local samples/ first, then the global directory
pub fn search_dirs() -> Vec<PathBuf> {
    [PathBuf::from("./samples"), samples_dir()]
        .into_iter()
        .filter(|d| d.is_dir())
        .collect()
}

/// Resolve a sample name to a file. Accepts absolute paths and names without `.wav`.
pub fn resolve_sample_path(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let as_path = Path::new(name);
    if as_path.is_absolute() && as_path.exists() {
        return Some(as_path.to_path_buf());
    }

    let with_ext = if name.to_lowercase().ends_with(".wav") {
        name.to_string()
    } else {
        format!("{}.wav", name)
    };
    dirs.iter()
        .map(|dir| dir.join(&with_ext))
        .find(|full| full.exists())
}

const ACTIVE_BIT: u8 = 0b01;
const PENDING_BIT: u8 = 0b10;

/// Two sample slots with a lock-free swap.
///
/// The loader writes only the inactive slot and then raises the pending bit.
/// The audio thread flips the active index with a single compare-exchange, so
/// the slot it is reading is never written.
pub struct SampleSlots {
    slots: [RwLock<Option<LoadedSample>>; 2],
    state: AtomicU8,
    loader: Mutex<()>,
}

impl SampleSlots {
    pub fn new() -> Self {
        Self {
            slots: [RwLock::new(None), RwLock::new(None)],
            state: AtomicU8::new(0),
            loader: Mutex::new(()),
        }
    }

    /// Put a sample in the inactive slot and queue it for activation
    pub fn stage(&self, sample: LoadedSample) {
        let _loading = self.loader.lock();
        // With the pending bit cleared the audio thread cannot flip under us
        let previous = self.state.fetch_and(!PENDING_BIT, Ordering::AcqRel);
        let inactive = 1 - (previous & ACTIVE_BIT) as usize;
        *self.slots[inactive].write() = Some(sample);
        self.state.fetch_or(PENDING_BIT, Ordering::AcqRel);
    }

    /// Audio side: make the staged sample active. Returns true if a swap happened.
    pub fn activate_pending(&self) -> bool {
        let current = self.state.load(Ordering::Acquire);
        if current & PENDING_BIT == 0 {
            return false;
        }
        let next = (current & ACTIVE_BIT) ^ ACTIVE_BIT;
        self.state
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn has_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) & PENDING_BIT != 0
    }

    pub fn active_index(&self) -> usize {
        (self.state.load(Ordering::Acquire) & ACTIVE_BIT) as usize
    }

    /// Run `f` on the active sample without blocking
    pub fn with_active<R>(&self, f: impl FnOnce(&LoadedSample) -> R) -> Option<R> {
        let guard = self.slots[self.active_index()].try_read()?;
        guard.as_ref().map(f)
    }

    pub fn active_name(&self) -> Option<String> {
        self.with_active(|s| s.name.clone())
    }
}

impl Default for SampleSlots {
    fn default() -> Self {
        Self::new()
    }
}
