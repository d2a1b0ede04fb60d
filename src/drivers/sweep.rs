use std::collections::BTreeMap;
use serde::Serialize;
use crate::drivers::buffer::{ConsistentDataset, Sample};
/// Divides one concatenated forward+backward array.
///
/// With an expected forward count the forward half is exactly that long and the
/// backward half holds whatever follows, capped at the same count. Without one
/// (`expected_forward == 0`) only even lengths are split down the middle; odd
/// lengths stay entirely forward.
pub fn split<T: Clone>(values: &[T], backward_enabled: bool, expected_forward: usize) -> (Vec<T>, Vec<T>) {
    if !backward_enabled || values.is_empty() {
        return (values.to_vec(), Vec::new());
    }
    if expected_forward > 0 {
        if values.len() < expected_forward {
            return (values.to_vec(), Vec::new());
        }
        let backward_end = values.len().min(expected_forward * 2);
        return (
            values[..expected_forward].to_vec(),
            values[expected_forward..backward_end].to_vec(),
        );
    }
    if values.len() % 2 == 0 {
        let half = values.len() / 2;
        (values[..half].to_vec(), values[half..].to_vec())
    } else {
        (values.to_vec(), Vec::new())
    }
}
/// Forward and backward halves of every channel of a dataset.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ForwardBackwardSplit {
    pub forward: BTreeMap<String, Vec<Sample>>,
    pub backward: BTreeMap<String, Vec<Sample>>,
}
impl ForwardBackwardSplit {
    pub fn from_dataset(dataset: &ConsistentDataset, backward_enabled: bool, expected_forward: usize) -> Self {
        let mut out = Self::default();
        for (key, values) in dataset.channels() {
            let (fwd, bwd) = split(values, backward_enabled, expected_forward);
            out.forward.insert(key.to_string(), fwd);
            out.backward.insert(key.to_string(), bwd);
        }
        out
    }
    pub fn forward(&self, key: &str) -> &[Sample] {
        self.forward.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn backward(&self, key: &str) -> &[Sample] {
        self.backward.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
    /// True when the backward half of `key` has at least one sample.
    pub fn has_backward(&self, key: &str) -> bool {
        !self.backward(key).is_empty()
    }
}
