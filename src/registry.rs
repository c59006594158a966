//! The registry of endogenous variables.
//!
//! Solvers work on a single flat vector. The registry records which contiguous range of that
//! vector belongs to each named store entry, so that solutions can be written back with their
//! labels intact.
use crate::solver::Vector;
use crate::store::{Entry, Store};
use anyhow::{Context, Result, bail, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::s;
use std::ops::Range;

/// How a registered variable is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum VariableKind {
    /// A labelled table; its values are packed in key order
    #[display("variable")]
    Variable,
    /// A single number
    #[display("scalar")]
    Scalar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Registration {
    kind: VariableKind,
    range: Range<usize>,
}

/// Maps variable names onto contiguous ranges of the flat solution vector
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariableRegistry {
    variables: IndexMap<String, Registration>,
    len: usize,
}

impl VariableRegistry {
    /// Compile ordered `(name, kind, length)` declarations into offsets
    pub fn from_declarations(declarations: &[(&str, VariableKind, usize)]) -> Result<Self> {
        let mut registry = Self::default();
        for &(name, kind, len) in declarations {
            ensure!(
                kind != VariableKind::Scalar || len == 1,
                "Scalar '{name}' must have length 1, got {len}"
            );
            let start = registry.len;
            registry.register(name, kind, start..start + len)?;
            registry.len += len;
        }

        Ok(registry)
    }

    /// Build a registry from explicit ranges.
    ///
    /// The ranges must partition `0..n` for some `n`: no gaps and no overlaps.
    pub fn from_ranges(ranges: &[(&str, VariableKind, Range<usize>)]) -> Result<Self> {
        let mut registry = Self::default();
        for (name, kind, range) in ranges {
            ensure!(
                *kind != VariableKind::Scalar || range.len() == 1,
                "Scalar '{name}' must have length 1, got {}",
                range.len()
            );
            registry.register(name, *kind, range.clone())?;
        }

        let mut end = 0;
        for (name, registration) in registry
            .variables
            .iter()
            .sorted_by_key(|(_, registration)| registration.range.start)
        {
            let range = &registration.range;
            ensure!(
                range.start >= end,
                "Range {range:?} of '{name}' overlaps another variable"
            );
            ensure!(
                range.start == end,
                "Gap between {end} and {} before '{name}'",
                range.start
            );
            end = range.end;
        }
        registry.len = end;

        Ok(registry)
    }

    /// Register the named store entries in order, taking lengths from the store.
    ///
    /// Tables are registered as variables with one element per entry, scalars with a single
    /// element.
    pub fn for_store(store: &Store, names: &[&str]) -> Result<Self> {
        let declarations = names
            .iter()
            .map(|&name| match store.get(name)? {
                Entry::Scalar(_) => Ok((name, VariableKind::Scalar, 1)),
                Entry::Table(table) => Ok((name, VariableKind::Variable, table.len())),
                Entry::Set(_) => bail!("Cannot register set '{name}' as a variable"),
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_declarations(&declarations)
    }

    fn register(&mut self, name: &str, kind: VariableKind, range: Range<usize>) -> Result<()> {
        ensure!(
            !self.variables.contains_key(name),
            "Variable '{name}' is registered twice"
        );
        self.variables
            .insert(name.to_string(), Registration { kind, range });

        Ok(())
    }

    /// The range of the flat vector holding the named variable, if registered
    pub fn range(&self, name: &str) -> Option<Range<usize>> {
        self.variables
            .get(name)
            .map(|registration| registration.range.clone())
    }

    /// The kind of the named variable, if registered
    pub fn kind(&self, name: &str) -> Option<VariableKind> {
        self.variables.get(name).map(|registration| registration.kind)
    }

    /// Length of the flat vector
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no elements are registered
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Registered names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    fn check_len(&self, x: &Vector) -> Result<()> {
        ensure!(
            x.len() == self.len,
            "Expected a vector of length {}, got {}",
            self.len,
            x.len()
        );

        Ok(())
    }

    /// Check that the store entry for `name` fits its registration
    fn check_entry(&self, name: &str, registration: &Registration, store: &Store) -> Result<()> {
        let len = registration.range.len();
        match (registration.kind, store.get(name)?) {
            (VariableKind::Scalar, Entry::Scalar(_)) => {}
            (VariableKind::Variable, Entry::Table(table)) => ensure!(
                table.len() == len,
                "'{name}' has {} labels but {len} elements are registered",
                table.len()
            ),
            (kind, entry) => bail!(
                "'{name}' is registered as a {kind} but the store holds a {}",
                entry.kind()
            ),
        }

        Ok(())
    }

    /// Flatten the current store values of every registered variable, in declaration order
    pub fn pack(&self, store: &Store) -> Result<Vector> {
        let mut x = Vector::zeros(self.len);
        for (name, registration) in &self.variables {
            self.check_entry(name, registration, store)?;
            let mut slice = x.slice_mut(s![registration.range.clone()]);
            match registration.kind {
                VariableKind::Scalar => slice[0] = store.scalar(name)?,
                VariableKind::Variable => {
                    for (dest, value) in slice.iter_mut().zip(store.table(name)?.values()) {
                        *dest = value;
                    }
                }
            }
        }

        Ok(x)
    }

    /// The value of `name` given the flat vector `x`.
    ///
    /// Tables get the store's labels re-attached and scalars are returned bare. Names which are
    /// not registered are passed through from the store unchanged.
    pub fn unpack(&self, x: &Vector, name: &str, store: &Store) -> Result<Entry> {
        self.check_len(x)?;
        let Some(registration) = self.variables.get(name) else {
            return Ok(store.get(name)?.clone());
        };

        self.check_entry(name, registration, store)?;
        let values = x.slice(s![registration.range.clone()]).to_vec();
        match registration.kind {
            VariableKind::Scalar => Ok(Entry::Scalar(values[0])),
            VariableKind::Variable => Ok(store
                .table(name)?
                .with_values(&values)
                .with_context(|| format!("Cannot unpack '{name}'"))?
                .into()),
        }
    }

    /// Overwrite every registered variable in the store with its value from `x`.
    ///
    /// Nothing is written unless every variable can be unpacked.
    pub fn write_back(&self, x: &Vector, store: &mut Store) -> Result<()> {
        let entries = self
            .names()
            .map(|name| Ok((name, self.unpack(x, name, store)?)))
            .collect::<Result<Vec<_>>>()?;
        for (name, entry) in entries {
            store.set(name, entry);
        }

        Ok(())
    }
}
