use std::collections::HashMap;

/// A field accepted by [`Selection::Fields`], with an optional cap on how many
/// files it takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    name: String,
    max_count: Option<usize>,
}

impl FieldSpec {
    pub fn new<N: Into<String>>(name: N) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            max_count: None,
        }
    }

    pub fn max_count(self, max_count: usize) -> FieldSpec {
        FieldSpec {
            max_count: Some(max_count),
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Which field names may carry files.
///
/// Text fields are never affected. A file on a field outside the selection
/// fails the parse with [`Error::UnexpectedFile`](crate::Error::UnexpectedFile);
/// one past a field's cap fails it with
/// [`Error::TooManyFiles`](crate::Error::TooManyFiles).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    /// Files on any field.
    #[default]
    Any,
    /// No files at all.
    None,
    /// At most one file, on the named field.
    Single(String),
    /// Files on the named field, optionally capped.
    Array { name: String, max_count: Option<usize> },
    /// Files on any of the listed fields, each with its own cap.
    Fields(Vec<FieldSpec>),
}

impl Selection {
    fn max_count_for(&self, field_name: &str) -> crate::Result<Option<usize>> {
        let unexpected = || crate::Error::UnexpectedFile {
            field_name: field_name.to_owned(),
        };

        match self {
            Selection::Any => Ok(None),
            Selection::None => Err(unexpected()),
            Selection::Single(name) if name == field_name => Ok(Some(1)),
            Selection::Array { name, max_count } if name == field_name => Ok(*max_count),
            Selection::Fields(specs) => specs
                .iter()
                .find(|spec| spec.name == field_name)
                .map(|spec| spec.max_count)
                .ok_or_else(unexpected),
            _ => Err(unexpected()),
        }
    }
}

/// Per-field file counts for one parse, checked against a [`Selection`].
#[derive(Debug)]
pub(crate) struct SelectionTracker<'a> {
    selection: &'a Selection,
    counts: HashMap<String, usize>,
}

impl<'a> SelectionTracker<'a> {
    pub(crate) fn new(selection: &'a Selection) -> SelectionTracker<'a> {
        SelectionTracker {
            selection,
            counts: HashMap::new(),
        }
    }

    /// Checks that one more file on `field_name` is allowed, without counting it.
    pub(crate) fn check(&self, field_name: &str) -> crate::Result<()> {
        let max_count = self.selection.max_count_for(field_name)?;
        let seen = self.counts.get(field_name).copied().unwrap_or(0);

        match max_count {
            Some(limit) if seen >= limit => Err(crate::Error::TooManyFiles {
                limit,
                field_name: Some(field_name.to_owned()),
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn accept(&mut self, field_name: &str) {
        *self.counts.entry(field_name.to_owned()).or_insert(0) += 1;
    }
}
