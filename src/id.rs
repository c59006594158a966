//! Code for handling index labels
use anyhow::{Context, Result};
use indexmap::IndexSet;

macro_rules! define_id_type {
    ($name:ident) => {
        #[derive(Clone, std::hash::Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
        /// A label type (e.g. an hour or a generation unit identifier)
        pub struct $name(pub std::rc::Rc<str>);

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(std::rc::Rc::from(s))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(std::rc::Rc::from(s))
            }
        }

        impl $name {
            /// Create a new label from a string slice
            pub fn new(id: &str) -> Self {
                $name(std::rc::Rc::from(id))
            }
        }
    };
}

define_id_type!(Label);

/// A single row key in a labelled table: one label per dimension
pub type Key = Vec<Label>;

/// Build a [`Key`] from string slices
pub fn key<S: AsRef<str>>(labels: &[S]) -> Key {
    labels.iter().map(|s| Label::new(s.as_ref())).collect()
}

/// Format a key as `a.b.c` for error messages
pub fn display_key(key: &[Label]) -> String {
    key.iter().map(ToString::to_string).collect::<Vec<_>>().join(".")
}

/// A data structure containing a set of labels
pub trait LabelCollection {
    /// Get the position of the label with the given string representation.
    ///
    /// # Returns
    ///
    /// The position of the label in `self`, or an error if not found.
    fn position_of(&self, label: &str) -> Result<usize>;
}

impl LabelCollection for IndexSet<Label> {
    fn position_of(&self, label: &str) -> Result<usize> {
        self.get_index_of(label)
            .with_context(|| format!("Unknown label {label} found"))
    }
}
