//! The indexed data store holding every named model input and output.
use anyhow::{Context, Result, bail, ensure};
use indexmap::IndexMap;

pub mod table;
pub use table::{LabelSet, Table};

/// A value held in the [`Store`]
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// A single number
    Scalar(f64),
    /// A set of labels, e.g. an index or a mapping between indices
    Set(LabelSet),
    /// Labelled values
    Table(Table),
}

/// The kind of a store entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum EntryKind {
    /// A single number
    #[display("scalar")]
    Scalar,
    /// An index or mapping
    #[display("set")]
    Set,
    /// Labelled values
    #[display("variable")]
    Variable,
}

impl Entry {
    /// The kind of this entry
    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Scalar(_) => EntryKind::Scalar,
            Entry::Set(_) => EntryKind::Set,
            Entry::Table(_) => EntryKind::Variable,
        }
    }
}

impl From<f64> for Entry {
    fn from(value: f64) -> Self {
        Entry::Scalar(value)
    }
}

impl From<Table> for Entry {
    fn from(value: Table) -> Self {
        Entry::Table(value)
    }
}

impl From<LabelSet> for Entry {
    fn from(value: LabelSet) -> Self {
        Entry::Set(value)
    }
}

/// A mapping from names to scalars, label sets and tables.
///
/// Names may be aliased with [`Store::update_alias`]; an alias reads and writes the original
/// entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Store {
    entries: IndexMap<String, Entry>,
    aliases: IndexMap<String, String>,
}

impl Store {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map_or(name, String::as_str)
    }

    /// Whether an entry (or alias) with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(self.resolve(name))
    }

    /// Get an entry by name
    pub fn get(&self, name: &str) -> Result<&Entry> {
        self.entries
            .get(self.resolve(name))
            .with_context(|| format!("'{name}' not found in store"))
    }

    /// Insert or replace an entry
    pub fn set(&mut self, name: &str, value: impl Into<Entry>) {
        let name = self.resolve(name).to_string();
        self.entries.insert(name, value.into());
    }

    /// The kind of the named entry
    pub fn kind(&self, name: &str) -> Result<EntryKind> {
        Ok(self.get(name)?.kind())
    }

    /// Get a scalar entry
    pub fn scalar(&self, name: &str) -> Result<f64> {
        match self.get(name)? {
            Entry::Scalar(value) => Ok(*value),
            other => bail!("'{name}' is a {}, not a scalar", other.kind()),
        }
    }

    /// Get a table entry
    pub fn table(&self, name: &str) -> Result<&Table> {
        match self.get(name)? {
            Entry::Table(table) => Ok(table),
            other => bail!("'{name}' is a {}, not a variable", other.kind()),
        }
    }

    /// Get a label set entry
    pub fn label_set(&self, name: &str) -> Result<&LabelSet> {
        match self.get(name)? {
            Entry::Set(set) => Ok(set),
            other => bail!("'{name}' is a {}, not a set", other.kind()),
        }
    }

    /// Register aliases as `(original, alias)` pairs.
    ///
    /// The original entry must exist and the alias must not clash with an existing entry.
    pub fn update_alias(&mut self, pairs: &[(&str, &str)]) -> Result<()> {
        for (original, alias) in pairs {
            ensure!(
                self.entries.contains_key(*original),
                "Cannot alias '{alias}' to unknown entry '{original}'"
            );
            ensure!(
                !self.entries.contains_key(*alias),
                "Alias '{alias}' clashes with an existing entry"
            );
            self.aliases
                .insert((*alias).to_string(), (*original).to_string());
        }

        Ok(())
    }

    /// Sum the named table over one of its dimensions
    pub fn sum_over(&self, name: &str, dim: &str) -> Result<Table> {
        self.table(name)?
            .sum_over(dim)
            .with_context(|| format!("Cannot sum '{name}' over '{dim}'"))
    }

    /// Broadcast the named table onto the keys of the named set
    pub fn broadcast(&self, name: &str, set_name: &str) -> Result<Table> {
        Ok(self.table(name)?.broadcast(self.label_set(set_name)?))
    }

    /// Iterate over entry names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
