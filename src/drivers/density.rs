//! Current-density scaling and source-current derivation.
//!
//! Lateral devices are normalized per gate width:
//! `J = I * 1000 / (width_um * 1e-3)` in mA/mm.
//! Vertical devices are normalized per area:
//! `J = I / (area_um2 * 1e-8)` in A/cm^2.
//! Without a usable geometry every present current maps to `0.0` and missing
//! currents stay missing.
use std::collections::BTreeMap;
use log::warn;
use serde::{Deserialize, Serialize};
use crate::drivers::buffer::{ConsistentDataset, Sample};
use crate::drivers::MeasurementError;
/// Terminal currents and the density channel derived from each.
pub const CURRENT_DENSITY_KEYS: [(&str, &str); 3] = [("Id", "Jd"), ("Ig", "Jg"), ("Is", "Js")];
pub const UNIT_LATERAL: &str = "mA/mm";
pub const UNIT_VERTICAL: &str = "A/cm^2";
pub const UNIT_ARBITRARY: &str = "A.U.";
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Lateral,
    Vertical,
    #[default]
    #[serde(other)]
    Unknown,
}
impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Lateral => "lateral",
            DeviceType::Vertical => "vertical",
            DeviceType::Unknown => "unknown",
        }
    }
}
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DensityCoefficient {
    Defined(f64),
    Undefined,
}
impl DensityCoefficient {
    pub fn is_defined(&self) -> bool {
        matches!(self, DensityCoefficient::Defined(_))
    }
    fn apply(&self, current: Sample) -> Sample {
        match (self, current) {
            (_, None) => None,
            (DensityCoefficient::Defined(k), Some(i)) => Some(i * k),
            (DensityCoefficient::Undefined, Some(_)) => Some(0.0),
        }
    }
}
/// Coefficient and unit label for a device geometry.
///
/// The unit follows the device type even when the geometry is not positive.
pub fn density_coefficient(device_type: DeviceType, width_um: f64, area_um2: f64) -> (DensityCoefficient, &'static str) {
    match device_type {
        DeviceType::Lateral if width_um > 0.0 => {
            (DensityCoefficient::Defined(1000.0 / (width_um * 1e-3)), UNIT_LATERAL)
        }
        DeviceType::Lateral => (DensityCoefficient::Undefined, UNIT_LATERAL),
        DeviceType::Vertical if area_um2 > 0.0 => {
            (DensityCoefficient::Defined(1.0 / (area_um2 * 1e-8)), UNIT_VERTICAL)
        }
        DeviceType::Vertical => (DensityCoefficient::Undefined, UNIT_VERTICAL),
        DeviceType::Unknown => (DensityCoefficient::Undefined, UNIT_ARBITRARY),
    }
}
/// Scales every current channel in `currents` into its density channel.
///
/// Returns densities keyed by density name (`Jd`, `Jg`, `Js`) and the unit label.
/// All outputs share the reference length: the first non-empty of `Id`, `Ig`,
/// `Is`, else the length of `Id`. A current of any other length yields an
/// all-missing density.
pub fn normalize_density(
    currents: &BTreeMap<String, Vec<Sample>>,
    device_type: DeviceType,
    width_um: f64,
    area_um2: f64,
) -> (BTreeMap<String, Vec<Sample>>, &'static str) {
    let (coefficient, unit) = density_coefficient(device_type, width_um, area_um2);
    let reference_len = CURRENT_DENSITY_KEYS
        .iter()
        .filter_map(|(current_key, _)| currents.get(*current_key))
        .find(|values| !values.is_empty())
        .or_else(|| currents.get("Id"))
        .map(Vec::len)
        .unwrap_or(0);
    let mut densities = BTreeMap::new();
    for (current_key, density_key) in CURRENT_DENSITY_KEYS {
        let density = match currents.get(current_key) {
            Some(values) if values.len() == reference_len => {
                values.iter().map(|&i| coefficient.apply(i)).collect()
            }
            _ => vec![None; reference_len],
        };
        densities.insert(density_key.to_string(), density);
    }
    (densities, unit)
}
/// Adds `Jd`, `Jg`, `Js` to the dataset and returns the unit label.
pub fn apply_current_densities(
    dataset: &mut ConsistentDataset,
    device_type: DeviceType,
    width_um: f64,
    area_um2: f64,
) -> &'static str {
    if !density_coefficient(device_type, width_um, area_um2).0.is_defined() {
        warn!(
            "no density coefficient for {} device (width {width_um} um, area {area_um2} um^2)",
            device_type.as_str()
        );
    }
    let currents: BTreeMap<String, Vec<Sample>> = CURRENT_DENSITY_KEYS
        .iter()
        .filter_map(|(key, _)| dataset.get(key).map(|v| (key.to_string(), v.to_vec())))
        .collect();
    let (densities, unit) = normalize_density(&currents, device_type, width_um, area_um2);
    for (key, values) in densities {
        dataset.insert_fitted(key, &values);
    }
    unit
}
/// Uses the directly measured source current when it holds data, otherwise
/// `Is = -(Id + Ig)`.
pub fn derive_source_current(dataset: &mut ConsistentDataset) -> Result<(), MeasurementError> {
    if dataset.has_data("Is_buffer") {
        let direct = dataset.channel_or_missing("Is_buffer");
        return dataset.insert("Is", direct);
    }
    let source: Vec<Sample> = if dataset.contains("Id") && dataset.contains("Ig") {
        let id = dataset.channel_or_missing("Id");
        let ig = dataset.channel_or_missing("Ig");
        id.iter()
            .zip(&ig)
            .map(|(d, g)| match (d, g) {
                (Some(d), Some(g)) => Some(-(d + g)),
                _ => None,
            })
            .collect()
    } else {
        vec![None; dataset.len()]
    };
    dataset.insert("Is", source)
}
