//! Detector configuration model.
//!
//! [`EigerSettings`] holds every field of the Eiger 1.8.0 `detector/config`
//! interface, with the defaults of a simulated Eiger X 16M, plus the nested
//! per-channel threshold configuration.
//!
//! # Derived fields
//!
//! Energy-related fields are coupled:
//!
//! - `element` sets `photon_energy` from the K-alpha table, then `wavelength`
//!   and `threshold_energy`
//! - `photon_energy` clears `element` and recalculates `wavelength` and
//!   `threshold_energy`
//! - `wavelength` clears `element` and recalculates `photon_energy` and
//!   `threshold_energy`
//! - `count_time` recalculates `frame_time = count_time + detector_readout_time`
//!
//! [`EigerSettings::set`] returns every field name changed by the write.

use sim_core::field::{FieldMetadata, FieldSet, FieldStore, ValueType};
use sim_core::{Field, FieldValue, SimError, SimResult};
use std::collections::BTreeMap;
use std::fmt;

/// Detector width in pixels.
pub const FRAME_WIDTH: u64 = 4148;
/// Detector height in pixels.
pub const FRAME_HEIGHT: u64 = 4362;

/// Characteristic K-alpha emission energies in eV.
pub const KA_ENERGY: &[(&str, f64)] = &[
    ("Li", 54.3),
    ("Be", 108.5),
    ("B", 183.3),
    ("C", 277.0),
    ("N", 392.4),
    ("O", 524.9),
    ("F", 676.8),
    ("Ne", 848.6),
    ("Na", 1040.98),
    ("Mg", 1253.6),
    ("Al", 1486.7),
    ("Si", 1739.98),
    ("P", 2013.7),
    ("S", 2307.84),
    ("Cl", 2622.39),
    ("Ar", 2957.7),
    ("K", 3313.8),
    ("Ca", 3691.68),
    ("Sc", 4090.6),
    ("Ti", 4510.84),
    ("V", 4952.2),
    ("Cr", 5414.72),
    ("Mn", 5898.75),
    ("Fe", 6403.84),
    ("Co", 6930.32),
    ("Ni", 7478.15),
    ("Cu", 8047.78),
    ("Zn", 8638.86),
];

/// K-alpha energy for a chemical symbol.
pub fn ka_energy(element: &str) -> Option<f64> {
    KA_ENERGY
        .iter()
        .find(|(symbol, _)| *symbol == element)
        .map(|(_, energy)| *energy)
}

/// Wavelength in Angstrom for a photon energy in eV.
pub fn wavelength_for(photon_energy: f64) -> f64 {
    (1240.0 / photon_energy) / 10.0
}

/// Photon energy in eV for a wavelength in Angstrom.
pub fn photon_energy_for(wavelength: f64) -> f64 {
    1240.0 / (wavelength * 10.0)
}

// =============================================================================
// TriggerMode
// =============================================================================

/// Detector trigger modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerMode {
    /// External enable, internal series
    Eies,
    /// External enable
    Exte,
    /// External gate
    Extg,
    /// External series: each trigger input starts one trigger's worth of images
    Exts,
    /// Internal enable
    Inte,
    /// Internal series: started by the `trigger` command
    Ints,
}

impl TriggerMode {
    pub const ALL: [TriggerMode; 6] = [
        Self::Eies,
        Self::Exte,
        Self::Extg,
        Self::Exts,
        Self::Inte,
        Self::Ints,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eies => "eies",
            Self::Exte => "exte",
            Self::Extg => "extg",
            Self::Exts => "exts",
            Self::Inte => "inte",
            Self::Ints => "ints",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.as_str() == value)
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Threshold sub-model
// =============================================================================

fn threshold(energy: f64) -> FieldSet {
    FieldSet::new("threshold")
        .with("energy", energy, FieldMetadata::rw(ValueType::Float))
        .with(
            "mode",
            "enabled",
            FieldMetadata::rw(ValueType::String).with_allowed_values(["enabled", "disabled"]),
        )
        .with("number_of_excluded_pixels", 0u64, FieldMetadata::ro(ValueType::UInt))
        .with_keys(&["energy", "mode", "number_of_excluded_pixels"])
}

fn threshold_difference() -> FieldSet {
    FieldSet::new("threshold/difference")
        .with("lower_threshold", 1u64, FieldMetadata::ro(ValueType::UInt))
        .with(
            "mode",
            "disabled",
            FieldMetadata::rw(ValueType::String).with_allowed_values(["enabled", "disabled"]),
        )
        .with("upper_threshold", 2u64, FieldMetadata::ro(ValueType::UInt))
        .with("number_of_excluded_pixels", 0u64, FieldMetadata::ro(ValueType::UInt))
        .with_keys(&["lower_threshold", "mode", "upper_threshold"])
}

/// Per-channel threshold configuration: `"1"`, `"2"` and `"difference"`.
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    channels: BTreeMap<&'static str, FieldSet>,
}

impl ThresholdConfig {
    pub fn new() -> Self {
        let mut channels = BTreeMap::new();
        channels.insert("1", threshold(6729.0));
        channels.insert("2", threshold(18841.0));
        channels.insert("difference", threshold_difference());
        Self { channels }
    }

    pub fn channel(&self, channel: &str) -> SimResult<&FieldSet> {
        self.channels
            .get(channel)
            .ok_or_else(|| SimError::FieldNotFound(format!("threshold/{}", channel)))
    }

    pub fn channel_mut(&mut self, channel: &str) -> SimResult<&mut FieldSet> {
        self.channels
            .get_mut(channel)
            .ok_or_else(|| SimError::FieldNotFound(format!("threshold/{}", channel)))
    }

    /// Energy of a numbered threshold, `0.0` for unknown channels.
    pub fn energy(&self, channel: &str) -> f64 {
        self.channels
            .get(channel)
            .map(|c| c.float("energy"))
            .unwrap_or_default()
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// EigerSettings
// =============================================================================

/// Public keys of the detector configuration.
pub const CONFIG_KEYS: &[&str] = &[
    "auto_summation",
    "beam_center_x",
    "beam_center_y",
    "bit_depth_image",
    "bit_depth_readout",
    "chi_increment",
    "chi_start",
    "compression",
    "count_time",
    "counting_mode",
    "countrate_correction_applied",
    "countrate_correction_count_cutoff",
    "data_collection_date",
    "description",
    "detector_distance",
    "detector_number",
    "detector_readout_time",
    "eiger_fw_version",
    "element",
    "extg_mode",
    "fast_arm",
    "flatfield_correction_applied",
    "frame_count_time",
    "frame_time",
    "incident_energy",
    "incident_particle_type",
    "instrument_name",
    "kappa_increment",
    "kappa_start",
    "mask_to_zero",
    "nexpi",
    "nimages",
    "ntrigger",
    "ntriggers_skipped",
    "number_of_excluded_pixels",
    "omega_increment",
    "omega_start",
    "phi_increment",
    "phi_start",
    "photon_energy",
    "pixel_mask_applied",
    "roi_mode",
    "sample_name",
    "sensor_material",
    "sensor_thickness",
    "software_version",
    "source_name",
    "threshold/1/energy",
    "threshold/1/mode",
    "threshold/1/number_of_excluded_pixels",
    "threshold/2/energy",
    "threshold/2/mode",
    "threshold/2/number_of_excluded_pixels",
    "threshold/difference/lower_threshold",
    "threshold/difference/mode",
    "threshold/difference/upper_threshold",
    "threshold_energy",
    "total_flux",
    "trigger_mode",
    "two_theta_increment",
    "two_theta_start",
    "virtual_pixel_correction_applied",
    "x_pixel_size",
    "x_pixels_in_detector",
    "y_pixel_size",
    "y_pixels_in_detector",
];

fn detector_config() -> FieldSet {
    use ValueType::{Bool, Float, FloatGrid, String as Str, UInt, UIntGrid};
    let rw = FieldMetadata::rw;
    let ro = FieldMetadata::ro;

    FieldSet::new("detector_config")
        .with("auto_summation", true, rw(Bool))
        .with("beam_center_x", 0.0, rw(Float))
        .with("beam_center_y", 0.0, rw(Float))
        .with("bit_depth_image", 16u64, ro(UInt))
        .with("bit_depth_readout", 16u64, ro(UInt))
        .with("chi_increment", 0.0, rw(Float))
        .with("chi_start", 0.0, rw(Float))
        .with(
            "compression",
            "bslz4",
            rw(Str).with_allowed_values(["lz4", "bslz4", "none"]),
        )
        .with("count_time", 0.1, rw(Float))
        .with(
            "counting_mode",
            "normal",
            rw(Str).with_allowed_values(["normal", "retrigger"]),
        )
        .with("countrate_correction_applied", true, rw(Bool))
        .with("countrate_correction_count_cutoff", 1000u64, ro(UInt))
        .with("data_collection_date", "2021-30-09T16:30:00.000-01:00", ro(Str))
        .with("description", "Simulated Eiger X 16M Detector", ro(Str))
        .with("detector_distance", 2.0, rw(Float))
        .with("detector_number", "EIGERSIM001", ro(Str))
        .with("detector_readout_time", 0.01, ro(Float))
        .with("eiger_fw_version", "1.8.0", ro(Str))
        .with(
            "element",
            "Co",
            rw(Str).with_allowed_values(KA_ENERGY.iter().map(|(symbol, _)| *symbol)),
        )
        .with(
            "extg_mode",
            "double",
            rw(Str).with_allowed_values(["single", "double"]),
        )
        .with("fast_arm", false, rw(Bool))
        .with("flatfield", vec![Vec::<f64>::new()], rw(FloatGrid))
        .with("flatfield_correction_applied", true, rw(Bool))
        .with("frame_count_time", 0.01, ro(Float))
        .with("frame_time", 0.12, rw(Float))
        .with("incident_energy", 13458.0, rw(Float))
        .with("incident_particle_type", "photons", ro(Str))
        .with("instrument_name", "", rw(Str))
        .with("kappa_increment", 0.0, rw(Float))
        .with("kappa_start", 0.0, rw(Float))
        .with("mask_to_zero", false, rw(Bool))
        .with("nexpi", 1u64, rw(UInt))
        .with("nimages", 1u64, rw(UInt))
        .with("ntrigger", 1u64, rw(UInt))
        .with("ntriggers_skipped", 0u64, rw(UInt))
        .with("number_of_excluded_pixels", 0u64, ro(UInt))
        .with("omega_increment", 0.0, rw(Float))
        .with("omega_start", 0.0, rw(Float))
        .with("phi_increment", 0.0, rw(Float))
        .with("phi_start", 0.0, rw(Float))
        .with("photon_energy", 6930.32, rw(Float))
        .with("pixel_mask", vec![Vec::<u64>::new()], rw(UIntGrid))
        .with("pixel_mask_applied", false, rw(Bool))
        .with(
            "roi_mode",
            "disabled",
            rw(Str).with_allowed_values(["disabled", "4M-L", "4M-R"]),
        )
        .with("sample_name", "", rw(Str))
        .with("sensor_material", "Silicon", ro(Str))
        .with("sensor_thickness", 0.01, ro(Float))
        .with("software_version", "0.1.0", ro(Str))
        .with("source_name", "", rw(Str))
        .with("threshold_energy", 4020.5, rw(Float))
        .with("total_flux", 0.0, rw(Float))
        .with(
            "trigger_mode",
            TriggerMode::Exts.as_str(),
            rw(Str).with_allowed_values(TriggerMode::ALL.map(TriggerMode::as_str)),
        )
        .with("two_theta_increment", 0.0, rw(Float))
        .with("two_theta_start", 0.0, rw(Float))
        .with("virtual_pixel_correction_applied", true, rw(Bool))
        .with("wavelength", 1.0, rw(Float))
        .with("x_pixel_size", 0.01, ro(Float))
        .with("x_pixels_in_detector", FRAME_WIDTH, ro(UInt))
        .with("y_pixel_size", 0.01, ro(Float))
        .with("y_pixels_in_detector", FRAME_HEIGHT, ro(UInt))
        .with_keys(CONFIG_KEYS)
}

/// Detector configuration with coupled energy fields.
#[derive(Debug, Clone)]
pub struct EigerSettings {
    fields: FieldSet,
    thresholds: ThresholdConfig,
}

impl EigerSettings {
    pub fn new() -> Self {
        Self {
            fields: detector_config(),
            thresholds: ThresholdConfig::new(),
        }
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn get(&self, name: &str) -> SimResult<&Field> {
        self.fields.get(name)
    }

    /// Assign a field and recalculate dependent fields.
    ///
    /// Returns the names of every field that changed, the written field last.
    /// Access modes are not checked here; see [`FieldStore::put_json`].
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> SimResult<Vec<String>> {
        let value = value.into();
        let changed: &[&str] = match name {
            "element" => {
                let symbol = value.as_str().ok_or_else(|| SimError::TypeMismatch {
                    field: name.to_string(),
                    expected: ValueType::String.to_string(),
                })?;
                let energy = ka_energy(symbol)
                    .ok_or_else(|| SimError::invalid(name, format!("unknown element '{}'", symbol)))?;
                self.fields.set("element", symbol)?;
                self.fields.set("photon_energy", energy)?;
                self.fields.set("wavelength", wavelength_for(energy))?;
                self.recalculate_threshold()?;
                &["photon_energy", "wavelength", "threshold_energy", "element"]
            }
            "photon_energy" => {
                let energy = positive(name, &value)?;
                self.fields.set("photon_energy", energy)?;
                self.fields.set("element", "")?;
                self.fields.set("wavelength", wavelength_for(energy))?;
                self.recalculate_threshold()?;
                &["element", "wavelength", "threshold_energy", "photon_energy"]
            }
            "wavelength" => {
                let wavelength = positive(name, &value)?;
                self.fields.set("wavelength", wavelength)?;
                self.fields.set("element", "")?;
                self.fields.set("photon_energy", photon_energy_for(wavelength))?;
                self.recalculate_threshold()?;
                &["element", "photon_energy", "threshold_energy", "wavelength"]
            }
            "count_time" => {
                self.fields.set("count_time", value)?;
                let frame_time = self.count_time() + self.fields.float("detector_readout_time");
                self.fields.set("frame_time", frame_time)?;
                &["frame_time", "count_time"]
            }
            _ => {
                self.fields.set(name, value)?;
                return Ok(vec![name.to_string()]);
            }
        };
        Ok(changed.iter().map(|c| c.to_string()).collect())
    }

    fn recalculate_threshold(&mut self) -> SimResult<()> {
        self.fields.set("threshold_energy", 0.5 * self.photon_energy())?;
        tracing::warn!("Flatfield not recalculated.");
        Ok(())
    }

    pub fn threshold_config(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    pub fn threshold_config_mut(&mut self) -> &mut ThresholdConfig {
        &mut self.thresholds
    }

    /// Name/value object of every setting except `exclude`.
    pub fn snapshot(&self, exclude: &[&str]) -> serde_json::Value {
        self.fields.snapshot(exclude)
    }

    pub fn nimages(&self) -> u64 {
        self.fields.uint("nimages")
    }

    pub fn ntrigger(&self) -> u64 {
        self.fields.uint("ntrigger")
    }

    pub fn trigger_mode(&self) -> Option<TriggerMode> {
        TriggerMode::parse(self.fields.text("trigger_mode"))
    }

    pub fn frame_time(&self) -> f64 {
        self.fields.float("frame_time")
    }

    pub fn count_time(&self) -> f64 {
        self.fields.float("count_time")
    }

    pub fn element(&self) -> &str {
        self.fields.text("element")
    }

    pub fn photon_energy(&self) -> f64 {
        self.fields.float("photon_energy")
    }

    pub fn wavelength(&self) -> f64 {
        self.fields.float("wavelength")
    }

    pub fn threshold_energy(&self) -> f64 {
        self.fields.float("threshold_energy")
    }

    /// Detector shape as `(x_pixels, y_pixels)`.
    pub fn shape(&self) -> (u64, u64) {
        (
            self.fields.uint("x_pixels_in_detector"),
            self.fields.uint("y_pixels_in_detector"),
        )
    }
}

impl Default for EigerSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldStore for EigerSettings {
    fn field(&self, name: &str) -> SimResult<Field> {
        self.fields.get(name).cloned()
    }

    fn write_field(&mut self, name: &str, value: FieldValue) -> SimResult<Vec<String>> {
        let changed = self.set(name, value)?;
        tracing::debug!("Set {} (changed: {:?})", name, changed);
        Ok(changed)
    }
}

fn positive(field: &str, value: &FieldValue) -> SimResult<f64> {
    match value.as_f64() {
        Some(v) if v > 0.0 && v.is_finite() => Ok(v),
        Some(v) => Err(SimError::invalid(field, format!("{} must be positive", v))),
        None => Err(SimError::TypeMismatch {
            field: field.to_string(),
            expected: ValueType::Float.to_string(),
        }),
    }
}
