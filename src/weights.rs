//! Named Weight Maps
//!
//! Parameter name → flat value vector. Names are the stable keys shared
//! between the model collaborator and every smoothing strategy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{HarnessError, Result};

/// Ordered mapping of parameter names to their flattened values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamedWeights(BTreeMap<String, Vec<f64>>);

impl NamedWeights {
    /// Create an empty map
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert or replace a parameter
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.0.insert(name.into(), values);
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.insert(name, values);
        self
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<f64>)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of scalar values across all parameters
    pub fn numel(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Same names and shapes, all values zero
    pub fn zeros_like(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), vec![0.0; v.len()]))
                .collect(),
        )
    }

    /// Sum of absolute values over every parameter
    pub fn abs_sum(&self) -> f64 {
        self.0.values().flatten().map(|x| x.abs()).sum()
    }

    /// L1 distance to another map with identical layout
    pub fn l1_distance(&self, other: &NamedWeights) -> Result<f64> {
        self.ensure_same_layout(other)?;
        Ok(self
            .0
            .iter()
            .map(|(name, values)| {
                let rhs = &other.0[name];
                values
                    .iter()
                    .zip(rhs)
                    .map(|(a, b)| (a - b).abs())
                    .sum::<f64>()
            })
            .sum())
    }

    /// Fail unless `other` has exactly the same parameter names and lengths
    pub fn ensure_same_layout(&self, other: &NamedWeights) -> Result<()> {
        if self.0.len() != other.0.len() {
            return Err(HarnessError::Smoothing(format!(
                "parameter count mismatch: expected {}, got {}",
                self.0.len(),
                other.0.len()
            )));
        }
        for (name, values) in &self.0 {
            match other.0.get(name) {
                None => {
                    return Err(HarnessError::Smoothing(format!(
                        "unknown weight name: {}",
                        name
                    )))
                }
                Some(rhs) if rhs.len() != values.len() => {
                    return Err(HarnessError::Smoothing(format!(
                        "shape mismatch for {}: expected {}, got {}",
                        name,
                        values.len(),
                        rhs.len()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Element-wise `self += other`. Names missing from `self` are added.
    pub fn add_assign(&mut self, other: &NamedWeights) {
        for (name, rhs) in &other.0 {
            let entry = self
                .0
                .entry(name.clone())
                .or_insert_with(|| vec![0.0; rhs.len()]);
            for (a, b) in entry.iter_mut().zip(rhs) {
                *a += *b;
            }
        }
    }

    /// Element-wise `self += other * factor`
    pub fn add_scaled(&mut self, other: &NamedWeights, factor: f64) {
        for (name, rhs) in &other.0 {
            let entry = self
                .0
                .entry(name.clone())
                .or_insert_with(|| vec![0.0; rhs.len()]);
            for (a, b) in entry.iter_mut().zip(rhs) {
                *a += *b * factor;
            }
        }
    }

    /// Multiply every value by `factor`
    pub fn scale(&mut self, factor: f64) {
        self.map_in_place(|x| x * factor);
    }

    /// Apply `f` to every value
    pub fn map_in_place(&mut self, f: impl Fn(f64) -> f64) {
        for values in self.0.values_mut() {
            for x in values.iter_mut() {
                *x = f(*x);
            }
        }
    }

    /// Return a copy with `f` applied to every value
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        let mut out = self.clone();
        out.map_in_place(f);
        out
    }
}

impl FromIterator<(String, Vec<f64>)> for NamedWeights {
    fn from_iter<I: IntoIterator<Item = (String, Vec<f64>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
