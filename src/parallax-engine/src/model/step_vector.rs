//! The step vector: one instant's samples across an operator's output.

/// Samples for a single evaluation instant.
///
/// `sample_ids` and `samples` are parallel sequences; series without a sample
/// at this instant are omitted. A step vector is owned by exactly one
/// consumer at a time and is returned to its producer's pool after use.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepVector {
    /// Timestamp in milliseconds since the epoch.
    pub t: i64,
    /// Dense ids of the series present at this step.
    pub sample_ids: Vec<u64>,
    /// Values, parallel to `sample_ids`.
    pub samples: Vec<f64>,
}

impl StepVector {
    /// Create an empty step vector for a timestamp.
    pub fn new(t: i64) -> Self {
        Self {
            t,
            sample_ids: Vec::new(),
            samples: Vec::new(),
        }
    }

    /// Append a sample.
    pub fn append_sample(&mut self, id: u64, value: f64) {
        self.sample_ids.push(id);
        self.samples.push(value);
    }

    /// Number of samples at this step.
    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    /// Whether the step holds no samples.
    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    /// Iterate over `(id, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        self.sample_ids
            .iter()
            .copied()
            .zip(self.samples.iter().copied())
    }

    /// Clear samples, keeping allocated capacity.
    pub(crate) fn reset(&mut self, t: i64) {
        self.t = t;
        self.sample_ids.clear();
        self.samples.clear();
    }
}
