//! Labelled tables and label sets.
//!
//! A [`Table`] maps a tuple of labels (one per named dimension) to a value. Only the handful of
//! operations needed by the market model are provided: natural joins, summation over a
//! dimension, dropping a dimension and outer addition with a fill value.
use crate::id::{Key, Label, display_key};
use anyhow::{Context, Result, bail, ensure};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use std::collections::HashMap;

/// Select the labels at `positions` from `key`
fn project(key: &[Label], positions: &[usize]) -> Key {
    positions.iter().map(|&i| key[i].clone()).collect()
}

/// Labelled values over one or more named dimensions
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    dims: Vec<String>,
    data: IndexMap<Key, f64>,
}

impl Table {
    /// Create an empty table with the given dimensions
    pub fn new<S: AsRef<str>>(dims: &[S]) -> Self {
        Self {
            dims: dims.iter().map(|d| d.as_ref().to_string()).collect(),
            data: IndexMap::new(),
        }
    }

    /// Create a one-dimensional table from `(label, value)` pairs
    pub fn vector<'a, I>(dim: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        Self {
            dims: vec![dim.to_string()],
            data: entries
                .into_iter()
                .map(|(label, value)| (vec![Label::new(label)], value))
                .collect(),
        }
    }

    /// Create a table from keys and values, checking that every key has the right length
    pub fn from_entries<S, I>(dims: &[S], entries: I) -> Result<Self>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = (Key, f64)>,
    {
        let mut table = Self::new(dims);
        for (key, value) in entries {
            table.insert(key, value)?;
        }

        Ok(table)
    }

    /// Insert a value, replacing any existing value for the same key
    pub fn insert(&mut self, key: Key, value: f64) -> Result<()> {
        ensure!(
            key.len() == self.dims.len(),
            "Key {} has {} labels but the table has dimensions [{}]",
            display_key(&key),
            key.len(),
            self.dims.join(", ")
        );
        self.data.insert(key, value);

        Ok(())
    }

    /// Get the value for the given key
    pub fn get(&self, key: &[Label]) -> Option<f64> {
        self.data.get(key).copied()
    }

    /// The names of the table's dimensions, in key order
    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    /// The position of `dim` within the table's keys
    pub fn dim_position(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over the keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.data.keys()
    }

    /// Iterate over the values in insertion order
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.values().copied()
    }

    /// Iterate over `(key, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&Key, f64)> {
        self.data.iter().map(|(key, value)| (key, *value))
    }

    /// The distinct labels along `dim`, in order of first appearance
    pub fn labels(&self, dim: &str) -> Result<IndexSet<Label>> {
        let pos = self.require_dim(dim)?;
        Ok(self.data.keys().map(|key| key[pos].clone()).collect())
    }

    /// A copy of this table with the same keys but new values, in key order.
    ///
    /// The number of values must equal the number of entries.
    pub fn with_values(&self, values: &[f64]) -> Result<Table> {
        ensure!(
            values.len() == self.data.len(),
            "Expected {} values for a table over [{}], got {}",
            self.data.len(),
            self.dims.join(", "),
            values.len()
        );

        Ok(Table {
            dims: self.dims.clone(),
            data: self.data.keys().cloned().zip(values.iter().copied()).collect(),
        })
    }

    fn require_dim(&self, dim: &str) -> Result<usize> {
        self.dim_position(dim).with_context(|| {
            format!(
                "Dimension '{dim}' not found in table over [{}]",
                self.dims.join(", ")
            )
        })
    }

    /// Multiply two tables, aligning entries on their shared dimensions.
    ///
    /// Only combinations present in both tables are kept. Dimensions found only in `other` are
    /// appended to the result's dimensions; with no shared dimensions the result is the cartesian
    /// product.
    pub fn mul(&self, other: &Table) -> Table {
        let (self_common, other_common): (Vec<usize>, Vec<usize>) = self
            .dims
            .iter()
            .enumerate()
            .filter_map(|(i, dim)| other.dims.iter().position(|d| d == dim).map(|j| (i, j)))
            .unzip();
        let other_rest = (0..other.dims.len())
            .filter(|i| !other_common.contains(i))
            .collect_vec();

        let mut grouped: HashMap<Key, Vec<(Key, f64)>> = HashMap::new();
        for (key, value) in &other.data {
            grouped
                .entry(project(key, &other_common))
                .or_default()
                .push((project(key, &other_rest), *value));
        }

        let mut dims = self.dims.clone();
        dims.extend(other_rest.iter().map(|&i| other.dims[i].clone()));
        let mut data = IndexMap::new();
        for (key, value) in &self.data {
            let Some(matches) = grouped.get(&project(key, &self_common)) else {
                continue;
            };
            for (rest, other_value) in matches {
                let mut new_key = key.clone();
                new_key.extend(rest.iter().cloned());
                data.insert(new_key, value * other_value);
            }
        }

        Table { dims, data }
    }

    /// Broadcast the table onto the keys of `set` (a join against a table of ones)
    pub fn broadcast(&self, set: &LabelSet) -> Table {
        self.mul(&set.to_table(1.0))
    }

    /// Sum over a single dimension, removing it from the result
    pub fn sum_over(&self, dim: &str) -> Result<Table> {
        let pos = self.require_dim(dim)?;
        let keep = (0..self.dims.len()).filter(|&i| i != pos).collect_vec();
        Ok(self.aggregate(&keep))
    }

    /// Sum over every dimension except those in `keep`
    pub fn group_sum<S: AsRef<str>>(&self, keep: &[S]) -> Result<Table> {
        let keep = keep
            .iter()
            .map(|dim| self.require_dim(dim.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.aggregate(&keep))
    }

    fn aggregate(&self, keep: &[usize]) -> Table {
        let mut data = IndexMap::new();
        for (key, value) in &self.data {
            *data.entry(project(key, keep)).or_insert(0.0) += value;
        }

        Table {
            dims: keep.iter().map(|&i| self.dims[i].clone()).collect(),
            data,
        }
    }

    /// Remove a dimension without aggregating.
    ///
    /// Fails if two entries would end up with the same key.
    pub fn drop_dim(&self, dim: &str) -> Result<Table> {
        let pos = self.require_dim(dim)?;
        let keep = (0..self.dims.len()).filter(|&i| i != pos).collect_vec();
        let mut data = IndexMap::new();
        for (key, value) in &self.data {
            let new_key = project(key, &keep);
            if data.insert(new_key, *value).is_some() {
                bail!(
                    "Dropping dimension '{dim}' merges duplicate entries for {}",
                    display_key(&project(key, &keep))
                );
            }
        }

        Ok(Table {
            dims: keep.iter().map(|&i| self.dims[i].clone()).collect(),
            data,
        })
    }

    /// Remove entries whose value is NaN
    pub fn drop_nan(&self) -> Table {
        Table {
            dims: self.dims.clone(),
            data: self
                .data
                .iter()
                .filter(|(_, value)| !value.is_nan())
                .map(|(key, value)| (key.clone(), *value))
                .collect(),
        }
    }

    /// Add two tables over the same dimensions, using `fill` where a key is missing from one side
    pub fn add_with_fill(&self, other: &Table, fill: f64) -> Result<Table> {
        ensure!(
            self.dims.len() == other.dims.len()
                && self.dims.iter().all(|d| other.dims.contains(d)),
            "Cannot add tables over [{}] and [{}]",
            self.dims.join(", "),
            other.dims.join(", ")
        );

        // Reorder the other table's keys to match ours
        let order = self.projector(&other.dims)?;
        let mut data: IndexMap<Key, f64> = self.data.clone();
        let mut seen = IndexSet::new();
        for (key, value) in &other.data {
            let key = project(key, &order);
            match data.get_mut(&key) {
                Some(existing) => *existing += value,
                None => {
                    data.insert(key.clone(), fill + value);
                }
            }
            seen.insert(key);
        }
        for (key, value) in &mut data {
            if !seen.contains(key) {
                *value += fill;
            }
        }

        Ok(Table {
            dims: self.dims.clone(),
            data,
        })
    }

    /// Positions within keys over `from_dims` which give a key of this table.
    ///
    /// Use with [`Table::get_projected`] to look up values for keys of a wider table.
    pub fn projector<S: AsRef<str>>(&self, from_dims: &[S]) -> Result<Vec<usize>> {
        self.dims
            .iter()
            .map(|dim| {
                from_dims
                    .iter()
                    .position(|d| d.as_ref() == dim)
                    .with_context(|| format!("Dimension '{dim}' is not available for lookup"))
            })
            .collect()
    }

    /// Look up the value for a key from a wider table, using positions from [`Table::projector`]
    pub fn get_projected(&self, positions: &[usize], key: &[Label]) -> Option<f64> {
        self.data.get(&project(key, positions)).copied()
    }

    /// Like [`Table::get_projected`], but return the entry's position in key order
    pub fn index_of_projected(&self, positions: &[usize], key: &[Label]) -> Option<usize> {
        self.data.get_index_of(&project(key, positions))
    }
}

/// An ordered set of label tuples over named dimensions (e.g. the hours, or a unit-to-profile
/// mapping)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSet {
    dims: Vec<String>,
    keys: IndexSet<Key>,
}

impl LabelSet {
    /// Create an empty set over the given dimensions
    pub fn new<S: AsRef<str>>(dims: &[S]) -> Self {
        Self {
            dims: dims.iter().map(|d| d.as_ref().to_string()).collect(),
            keys: IndexSet::new(),
        }
    }

    /// Create a one-dimensional set from labels
    pub fn from_labels<'a, I>(dim: &str, labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            dims: vec![dim.to_string()],
            keys: labels
                .into_iter()
                .map(|label| vec![Label::new(label)])
                .collect(),
        }
    }

    /// Add a key to the set
    pub fn insert(&mut self, key: Key) -> Result<()> {
        ensure!(
            key.len() == self.dims.len(),
            "Key {} has {} labels but the set has dimensions [{}]",
            display_key(&key),
            key.len(),
            self.dims.join(", ")
        );
        self.keys.insert(key);

        Ok(())
    }

    /// The names of the set's dimensions
    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether the set contains `key`
    pub fn contains(&self, key: &[Label]) -> bool {
        self.keys.contains(key)
    }

    /// Iterate over keys in order
    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    /// A table over the same keys with every value set to `value`
    pub fn to_table(&self, value: f64) -> Table {
        Table {
            dims: self.dims.clone(),
            data: self.keys.iter().map(|key| (key.clone(), value)).collect(),
        }
    }
}
