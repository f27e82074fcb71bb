use std::{collections::BTreeMap, fmt};

use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Numeric class code carried in the `Classification` column.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ClassLabel(pub i32);

impl ClassLabel {
    pub fn code(self) -> i32 {
        self.0
    }

    /// Converts a cell value into a label. Codes are written as integers, but
    /// `2.0` is accepted as well since some exporters write every column as real.
    pub fn from_value(value: f64) -> Result<Self> {
        if !value.is_finite() || value.fract() != 0.0 {
            return Err(Error::parse(
                None,
                format!("'{value}' is not an integer class code"),
            ));
        }
        if value < i32::MIN as f64 || value > i32::MAX as f64 {
            return Err(Error::parse(
                None,
                format!("class code {value} is out of range"),
            ));
        }
        Ok(Self(value as i32))
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ClassLabel {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#RRGGBB` (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(Error::Config(format!("'{hex}' is not a #RRGGBB colour")));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| Error::Config(format!("'{hex}' is not a #RRGGBB colour")))
        };
        Ok(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for Rgb {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_hex()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassEntry {
    pub code: ClassLabel,
    pub name: String,
    pub color: Rgb,
}

/// Fixed lookup from class code to a symbolic name and a display colour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ClassEntry>", into = "Vec<ClassEntry>")]
pub struct ClassScheme {
    entries: Vec<ClassEntry>,
}

impl From<Vec<ClassEntry>> for ClassScheme {
    fn from(entries: Vec<ClassEntry>) -> Self {
        Self::new(entries)
    }
}

impl From<ClassScheme> for Vec<ClassEntry> {
    fn from(scheme: ClassScheme) -> Self {
        scheme.entries
    }
}

impl Default for ClassScheme {
    fn default() -> Self {
        Self::land_cover()
    }
}

impl ClassScheme {
    pub fn new(mut entries: Vec<ClassEntry>) -> Self {
        entries.sort_by_key(|e| e.code);
        entries.dedup_by_key(|e| e.code);
        Self { entries }
    }

    /// ground / vegetation / buildings, as emitted by the service model.
    pub fn land_cover() -> Self {
        Self::new(vec![
            ClassEntry {
                code: ClassLabel(1),
                name: "ground".to_string(),
                color: Rgb::new(0x00, 0x09, 0xDE),
            },
            ClassEntry {
                code: ClassLabel(2),
                name: "vegetation".to_string(),
                color: Rgb::new(0x7E, 0xFF, 0x0C),
            },
            ClassEntry {
                code: ClassLabel(3),
                name: "buildings".to_string(),
                color: Rgb::new(0xFB, 0x03, 0x04),
            },
        ])
    }

    /// [`ClassScheme::land_cover`] plus a catch-all `others` class (code 4).
    pub fn land_cover_with_others() -> Self {
        let mut entries = Self::land_cover().entries;
        entries.push(ClassEntry {
            code: ClassLabel(4),
            name: "others".to_string(),
            color: Rgb::new(0x80, 0x80, 0x80),
        });
        Self::new(entries)
    }

    pub fn entries(&self) -> &[ClassEntry] {
        &self.entries
    }

    pub fn entry(&self, label: ClassLabel) -> Option<&ClassEntry> {
        self.entries
            .binary_search_by_key(&label, |e| e.code)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Display name of a label; unknown codes fall back to the number itself.
    pub fn name(&self, label: ClassLabel) -> String {
        self.entry(label)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| label.to_string())
    }

    pub fn color(&self, label: ClassLabel) -> Result<Rgb> {
        self.entry(label)
            .map(|e| e.color)
            .ok_or(Error::UnmappedClass(label))
    }

    /// Colour per label, failing on the first label without an entry.
    pub fn colors_for(&self, labels: &[ClassLabel]) -> Result<Vec<Rgb>> {
        labels.iter().map(|&label| self.color(label)).collect()
    }
}

/// Rewrites ground-truth codes from a source code set into the class codes the
/// model is trained on (e.g. ASPRS `2/5/6` into `1/2/3`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelRemap {
    #[serde(default)]
    pub mapping: BTreeMap<i32, i32>,
    /// Code for every source code missing from `mapping`; `None` keeps it as is.
    #[serde(default)]
    pub unmapped: Option<i32>,
}

impl LabelRemap {
    pub fn is_identity(&self) -> bool {
        self.mapping.is_empty() && self.unmapped.is_none()
    }

    pub fn apply(&self, label: ClassLabel) -> ClassLabel {
        match self.mapping.get(&label.0) {
            Some(&code) => ClassLabel(code),
            None => self.unmapped.map(ClassLabel).unwrap_or(label),
        }
    }

    pub fn apply_all(&self, labels: &mut [ClassLabel]) {
        if self.is_identity() {
            return;
        }
        for label in labels.iter_mut() {
            *label = self.apply(*label);
        }
    }
}

/// Sorted, de-duplicated set of labels appearing in any of the given slices.
pub fn observed_labels(sets: &[&[ClassLabel]]) -> Vec<ClassLabel> {
    let mut labels: Vec<ClassLabel> = sets.iter().flat_map(|s| s.iter().copied()).collect();
    labels.sort_unstable();
    labels.dedup();
    labels
}
