//! Lock-free waveform and gain-reduction capture for visualisation.
//!
//! # Lifecycle
//! - The engine writes one [`TelemetryRecord`] per native sample (averaged
//!   over channels) into a fixed ring of atomics, then publishes the new
//!   cursor with `Release`.
//! - [`TelemetryReader::refresh`] loads the cursor with `Acquire` and folds
//!   the most recent `capacity` records into fixed min/max/average segments.
//!   It never blocks the writer; a record overwritten mid-read only costs a
//!   slightly stale segment.
//! - Nothing is returned until the ring has been filled once.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::dsp::ProcessorKind;

/// Fields per record.
pub const METRIC_COUNT: usize = 13;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryRecord {
    pub input: f32,
    /// Raw output of each processor before blending.
    pub raw: [f32; 4],
    pub output: f32,
    pub gain_reduction_db: [f32; 4],
    /// Protection IRC band levels `[low, mid, high]`.
    pub bands: [f32; 3],
}

impl TelemetryRecord {
    fn to_fields(self) -> [f32; METRIC_COUNT] {
        let mut f = [0.0; METRIC_COUNT];
        f[0] = self.input;
        f[1..5].copy_from_slice(&self.raw);
        f[5] = self.output;
        f[6..10].copy_from_slice(&self.gain_reduction_db);
        f[10..13].copy_from_slice(&self.bands);
        f
    }

    /// Adds `other * scale` field by field.
    pub fn accumulate(&mut self, other: &TelemetryRecord, scale: f32) {
        self.input += other.input * scale;
        self.output += other.output * scale;
        for k in 0..4 {
            self.raw[k] += other.raw[k] * scale;
            self.gain_reduction_db[k] += other.gain_reduction_db[k] * scale;
        }
        for b in 0..3 {
            self.bands[b] += other.bands[b] * scale;
        }
    }
}

/// Addresses one field of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Input,
    Raw(ProcessorKind),
    Output,
    GainReduction(ProcessorKind),
    /// 0 = low, 1 = mid, 2 = high.
    Band(usize),
}

impl Metric {
    pub fn index(self) -> usize {
        match self {
            Metric::Input => 0,
            Metric::Raw(kind) => 1 + kind.index(),
            Metric::Output => 5,
            Metric::GainReduction(kind) => 6 + kind.index(),
            Metric::Band(b) => 10 + b.min(2),
        }
    }
}

pub struct Telemetry {
    slots: Box<[[AtomicU32; METRIC_COUNT]]>,
    cursor: AtomicU64,
    ready: AtomicBool,
}

impl Telemetry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity.max(1))
                .map(|_| std::array::from_fn(|_| AtomicU32::new(0)))
                .collect(),
            cursor: AtomicU64::new(0),
            ready: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Total records ever written.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// True once every slot holds a real record.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Appends records. Single producer only.
    pub fn write(&self, records: &[TelemetryRecord]) {
        if records.is_empty() {
            return;
        }
        let cap = self.slots.len() as u64;
        let start = self.cursor.load(Ordering::Relaxed);
        for (offset, record) in records.iter().enumerate() {
            let slot = &self.slots[((start + offset as u64) % cap) as usize];
            for (cell, value) in slot.iter().zip(record.to_fields()) {
                cell.store(value.to_bits(), Ordering::Relaxed);
            }
        }
        let end = start + records.len() as u64;
        self.cursor.store(end, Ordering::Release);
        if end >= cap {
            self.ready.store(true, Ordering::Release);
        }
    }

    fn field(&self, index: u64, metric: usize) -> f32 {
        let slot = &self.slots[(index % self.slots.len() as u64) as usize];
        f32::from_bits(slot[metric].load(Ordering::Relaxed))
    }

    /// Clears the ring and the ready flag. Must not race with `write`.
    pub fn clear(&self) {
        for slot in self.slots.iter() {
            for cell in slot.iter() {
                cell.store(0, Ordering::Relaxed);
            }
        }
        self.cursor.store(0, Ordering::Release);
        self.ready.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentSummary {
    pub min: [f32; METRIC_COUNT],
    pub max: [f32; METRIC_COUNT],
    pub avg: [f32; METRIC_COUNT],
}

impl Default for SegmentSummary {
    fn default() -> Self {
        Self {
            min: [0.0; METRIC_COUNT],
            max: [0.0; METRIC_COUNT],
            avg: [0.0; METRIC_COUNT],
        }
    }
}

impl SegmentSummary {
    pub fn min(&self, metric: Metric) -> f32 {
        self.min[metric.index()]
    }

    pub fn max(&self, metric: Metric) -> f32 {
        self.max[metric.index()]
    }

    pub fn avg(&self, metric: Metric) -> f32 {
        self.avg[metric.index()]
    }
}

/// Consumer side: owns the segment array it rebuilds.
pub struct TelemetryReader {
    telemetry: Arc<Telemetry>,
    segments: Vec<SegmentSummary>,
    last_cursor: u64,
}

impl TelemetryReader {
    pub fn new(telemetry: Arc<Telemetry>, segments: usize) -> Self {
        let segments = segments.clamp(1, telemetry.capacity());
        Self {
            telemetry,
            segments: vec![SegmentSummary::default(); segments],
            last_cursor: 0,
        }
    }

    pub fn segments(&self) -> &[SegmentSummary] {
        &self.segments
    }

    /// Rebuilds the segments from the newest `capacity` records, oldest
    /// first. Returns false (segments untouched) while the ring is not yet
    /// full or nothing new was written.
    pub fn refresh(&mut self) -> bool {
        if !self.telemetry.is_ready() {
            return false;
        }
        let end = self.telemetry.cursor();
        if end == self.last_cursor {
            return false;
        }
        self.last_cursor = end;

        let window = self.telemetry.capacity() as u64;
        let start = end.saturating_sub(window);
        let count = self.segments.len() as u64;
        for (s, segment) in self.segments.iter_mut().enumerate() {
            let seg_start = start + window * s as u64 / count;
            let seg_end = (start + window * (s as u64 + 1) / count).max(seg_start + 1);
            let mut summary = SegmentSummary {
                min: [f32::INFINITY; METRIC_COUNT],
                max: [f32::NEG_INFINITY; METRIC_COUNT],
                avg: [0.0; METRIC_COUNT],
            };
            for index in seg_start..seg_end {
                for m in 0..METRIC_COUNT {
                    let v = self.telemetry.field(index, m);
                    summary.min[m] = summary.min[m].min(v);
                    summary.max[m] = summary.max[m].max(v);
                    summary.avg[m] += v;
                }
            }
            let n = (seg_end - seg_start) as f32;
            summary.avg.iter_mut().for_each(|a| *a /= n);
            *segment = summary;
        }
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
