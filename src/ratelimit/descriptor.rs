//! Request descriptor types.

/// One key/value label on a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    /// The label key.
    pub key: String,
    /// The label value.
    pub value: String,
}

impl Entry {
    /// Create an entry from a key and value.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An ordered set of key/value labels identifying what is being rate
/// limited, optionally refined by nested child descriptors.
///
/// Entry order is significant: it must match the order rules were
/// authored in. Descriptors are read-only input to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Descriptor {
    /// The ordered entries of this descriptor.
    pub entries: Vec<Entry>,
    /// More specific sub-cases of this descriptor. A nested descriptor
    /// extends its parent's matched path; the most specific nested match
    /// wins over the parent's own match.
    pub descriptors: Vec<Descriptor>,
}

impl Descriptor {
    /// Create a flat descriptor from entries.
    pub fn new(entries: impl IntoIterator<Item = Entry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            descriptors: Vec::new(),
        }
    }

    /// Attach a nested child descriptor.
    pub fn with_nested(mut self, child: Descriptor) -> Self {
        self.descriptors.push(child);
        self
    }
}
