use std::collections::BTreeMap;
use log::debug;
use ndarray::Array1;
use serde::Serialize;
use crate::drivers::MeasurementError;
/// One reading. `None` marks a sample the instrument never delivered.
pub type Sample = Option<f64>;
/// NaN coming back from the instrument is treated the same as a missing sample.
pub fn sample_from_f64(value: f64) -> Sample {
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}
/// Converts samples to the NaN-encoded form the numeric kernels work on.
pub fn to_array(samples: &[Sample]) -> Array1<f64> {
    samples.iter().map(|s| s.unwrap_or(f64::NAN)).collect()
}
pub fn from_array(values: &Array1<f64>) -> Vec<Sample> {
    values.iter().copied().map(sample_from_f64).collect()
}
/// Right-truncates or right-pads (with missing samples) to exactly `len`.
pub fn fit_to_length(values: &[Sample], len: usize) -> Vec<Sample> {
    let mut out: Vec<Sample> = values.iter().copied().take(len).collect();
    out.resize(len, None);
    out
}
/// Channels exactly as they were retrieved, before any alignment.
#[derive(Clone, Debug, Default)]
pub struct RawBufferSet {
    channels: BTreeMap<String, Option<Vec<f64>>>,
    retrieved_counts: Vec<usize>,
}
impl RawBufferSet {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, key: impl Into<String>, values: Vec<f64>) {
        self.retrieved_counts.push(values.len());
        self.channels.insert(key.into(), Some(values));
    }
    /// Registers a channel that is expected but produced no array at all.
    pub fn insert_missing(&mut self, key: impl Into<String>) {
        self.channels.insert(key.into(), None);
    }
    pub fn get(&self, key: &str) -> Option<&[f64]> {
        self.channels.get(key).and_then(|c| c.as_deref())
    }
    pub fn retrieved_counts(&self) -> &[usize] {
        &self.retrieved_counts
    }
}
/// Picks the single length every channel of the run is aligned to.
///
/// The first priority key holding a non-empty array wins; otherwise the largest
/// positive retrieved count; otherwise zero.
pub fn consistent_length(
    buffers: &RawBufferSet,
    priority_keys: &[&str],
    retrieved_counts: &[usize],
) -> usize {
    for key in priority_keys {
        if let Some(values) = buffers.get(key) {
            if !values.is_empty() {
                return values.len();
            }
        }
    }
    retrieved_counts
        .iter()
        .copied()
        .filter(|&count| count > 0)
        .max()
        .unwrap_or(0)
}
/// Aligns every channel of `buffers` to `len`.
pub fn normalize(buffers: &RawBufferSet, len: usize) -> ConsistentDataset {
    let mut dataset = ConsistentDataset::empty(len);
    for (key, channel) in &buffers.channels {
        let samples = match channel {
            Some(values) => {
                if values.len() > len {
                    debug!("{key}: truncating {} samples to {len}", values.len());
                } else if values.len() < len {
                    debug!("{key}: padding {} samples to {len}", values.len());
                }
                let converted: Vec<Sample> = values.iter().copied().map(sample_from_f64).collect();
                fit_to_length(&converted, len)
            }
            None => {
                debug!("{key}: no data retrieved, filling {len} missing samples");
                vec![None; len]
            }
        };
        dataset.channels.insert(key.clone(), samples);
    }
    dataset
}
/// Named channels that all hold exactly `len` samples.
#[derive(Clone, Debug, Serialize)]
pub struct ConsistentDataset {
    len: usize,
    channels: BTreeMap<String, Vec<Sample>>,
}
impl ConsistentDataset {
    pub fn empty(len: usize) -> Self {
        Self {
            len,
            channels: BTreeMap::new(),
        }
    }
    pub fn len(&self) -> usize {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
    pub fn contains(&self, key: &str) -> bool {
        self.channels.contains_key(key)
    }
    pub fn get(&self, key: &str) -> Option<&[Sample]> {
        self.channels.get(key).map(Vec::as_slice)
    }
    /// Missing channels read as a run of missing samples.
    pub fn channel_or_missing(&self, key: &str) -> Vec<Sample> {
        self.get(key)
            .map(<[Sample]>::to_vec)
            .unwrap_or_else(|| vec![None; self.len])
    }
    /// True when the channel exists and at least one sample is present.
    pub fn has_data(&self, key: &str) -> bool {
        self.get(key)
            .map(|values| values.iter().any(Option::is_some))
            .unwrap_or(false)
    }
    pub fn insert(&mut self, key: impl Into<String>, values: Vec<Sample>) -> Result<(), MeasurementError> {
        let key = key.into();
        if values.len() != self.len {
            return Err(MeasurementError::LengthMismatch {
                key,
                expected: self.len,
                actual: values.len(),
            });
        }
        self.channels.insert(key, values);
        Ok(())
    }
    /// Inserts after fitting `values` to the dataset length.
    pub fn insert_fitted(&mut self, key: impl Into<String>, values: &[Sample]) {
        self.channels
            .insert(key.into(), fit_to_length(values, self.len));
    }
    pub fn channels(&self) -> impl Iterator<Item = (&str, &[Sample])> {
        self.channels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }
    pub fn to_array(&self, key: &str) -> Array1<f64> {
        to_array(&self.channel_or_missing(key))
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn raw(pairs: &[(&str, Vec<f64>)]) -> RawBufferSet {
        let mut set = RawBufferSet::new();
        for (key, values) in pairs {
            set.insert(*key, values.clone());
        }
        set
    }
    #[test]
    fn priority_key_wins_over_longer_channels() {
        let set = raw(&[("Id", vec![1.0; 5]), ("Time", vec![0.0; 40])]);
        let len = consistent_length(&set, &["Id", "Vg_read"], set.retrieved_counts());
        assert_eq!(len, 5);
    }
    #[test]
    fn empty_priority_key_is_skipped() {
        let set = raw(&[("Id", vec![]), ("Vg_read", vec![1.0; 3]), ("Time", vec![0.0; 8])]);
        let len = consistent_length(&set, &["Id", "Vg_read"], set.retrieved_counts());
        assert_eq!(len, 3);
    }
    #[test]
    fn falls_back_to_largest_retrieved_count() {
        let set = raw(&[("Time", vec![0.0; 4]), ("Ig", vec![0.0; 7])]);
        assert_eq!(consistent_length(&set, &["Id"], set.retrieved_counts()), 7);
        assert_eq!(consistent_length(&RawBufferSet::new(), &["Id"], &[0, 0]), 0);
    }
    #[test]
    fn normalize_truncates_and_pads() {
        let set = raw(&[("long", vec![1.0, 2.0, 3.0, 4.0]), ("short", vec![5.0])]);
        let data = normalize(&set, 3);
        assert_eq!(data.get("long").unwrap(), &[Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(data.get("short").unwrap(), &[Some(5.0), None, None]);
        for (_, values) in data.channels() {
            assert_eq!(values.len(), 3);
        }
    }
    #[test]
    fn normalize_to_zero_empties_everything() {
        let mut set = raw(&[("Id", vec![1.0, 2.0])]);
        set.insert_missing("Ig");
        let data = normalize(&set, 0);
        assert!(data.is_empty());
        assert!(data.get("Id").unwrap().is_empty());
        assert!(data.get("Ig").unwrap().is_empty());
    }
    #[test]
    fn missing_channel_becomes_all_missing() {
        let mut set = raw(&[("Id", vec![1.0, 2.0])]);
        set.insert_missing("Is_buffer");
        let data = normalize(&set, 2);
        assert_eq!(data.get("Is_buffer").unwrap(), &[None::<f64>, None]);
    }
    #[test]
    fn short_gate_channel_is_padded_to_drain_length() {
        let vg: Vec<f64> = (0..9).map(|i| i as f64 * 0.1).collect();
        let id: Vec<f64> = (0..11).map(|i| i as f64 * 1e-6).collect();
        let set = raw(&[("Vg", vg.clone()), ("Id", id)]);
        let len = consistent_length(&set, &["Id"], set.retrieved_counts());
        assert_eq!(len, 11);
        let data = normalize(&set, len);
        let vg_out = data.get("Vg").unwrap();
        assert_eq!(vg_out.len(), 11);
        for (i, v) in vg.iter().enumerate() {
            assert_eq!(vg_out[i], Some(*v));
        }
        assert_eq!(&vg_out[9..], &[None::<f64>, None]);
    }
    #[test]
    fn nan_readings_become_missing_samples() {
        let set = raw(&[("Id", vec![1.0, f64::NAN, 3.0])]);
        let data = normalize(&set, 3);
        assert_eq!(data.get("Id").unwrap(), &[Some(1.0), None, Some(3.0)]);
        assert!(data.to_array("Id")[1].is_nan());
    }
    #[test]
    fn insert_rejects_wrong_length() {
        let mut data = ConsistentDataset::empty(2);
        let err = data.insert("gm", vec![None]).unwrap_err();
        assert!(matches!(err, MeasurementError::LengthMismatch { expected: 2, actual: 1, .. }));
        assert_eq!(err.kind(), crate::drivers::ErrorKind::ProcessingError);
    }
}
