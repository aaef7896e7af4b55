//! Input list expansion

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::error::InputError;

/// One entry of a caller-provided input list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEntry {
    pub locator: String,
    /// Overrides the entry's list position as its owner index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_index: Option<usize>,
}

impl InputEntry {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            explicit_index: None,
        }
    }

    #[must_use]
    pub fn with_index(mut self, index: usize) -> Self {
        self.explicit_index = Some(index);
        self
    }
}

/// What the viewer was asked to open
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputSpec {
    List(Vec<InputEntry>),
    /// Expands to `base_folder/1.ext` .. `base_folder/count.ext`
    Pattern {
        base_folder: String,
        extension: String,
        count: usize,
    },
}

/// An immutable, ordered reference to one input document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputReference {
    pub locator: String,
    pub owner_index: usize,
}

impl InputSpec {
    /// Expand into references sorted by owner index
    pub fn expand(&self) -> Result<Vec<InputReference>, InputError> {
        let mut refs: Vec<InputReference> = match self {
            Self::List(entries) => entries
                .iter()
                .enumerate()
                .map(|(position, entry)| InputReference {
                    locator: entry.locator.clone(),
                    owner_index: entry.explicit_index.unwrap_or(position),
                })
                .collect(),
            Self::Pattern {
                base_folder,
                extension,
                count,
            } => {
                if *count == 0 {
                    return Err(InputError::EmptyPattern);
                }
                let base = base_folder.trim_end_matches(['/', '\\']);
                let ext = extension.trim_start_matches('.');
                (1..=*count)
                    .map(|n| InputReference {
                        locator: if base.is_empty() {
                            format!("{n}.{ext}")
                        } else {
                            format!("{base}/{n}.{ext}")
                        },
                        owner_index: n - 1,
                    })
                    .collect()
            }
        };

        if refs.is_empty() {
            return Err(InputError::Empty);
        }

        let mut seen = HashSet::with_capacity(refs.len());
        if let Some(dup) = refs.iter().find(|r| !seen.insert(r.owner_index)) {
            return Err(InputError::DuplicateIndex {
                index: dup.owner_index,
            });
        }

        refs.sort_by_key(|r| r.owner_index);
        Ok(refs)
    }
}

impl From<Vec<String>> for InputSpec {
    fn from(locators: Vec<String>) -> Self {
        Self::List(locators.into_iter().map(InputEntry::new).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_expands_one_based_names_zero_based_owners() {
        let spec = InputSpec::Pattern {
            base_folder: "scans/".to_string(),
            extension: ".jpg".to_string(),
            count: 3,
        };
        let refs = spec.expand().unwrap();
        let locators: Vec<_> = refs.iter().map(|r| r.locator.as_str()).collect();
        assert_eq!(locators, ["scans/1.jpg", "scans/2.jpg", "scans/3.jpg"]);
        assert_eq!(refs[2].owner_index, 2);
    }

    #[test]
    fn explicit_indices_reorder_the_list() {
        let spec = InputSpec::List(vec![
            InputEntry::new("b.png").with_index(1),
            InputEntry::new("a.png").with_index(0),
        ]);
        let refs = spec.expand().unwrap();
        assert_eq!(refs[0].locator, "a.png");
        assert_eq!(refs[1].locator, "b.png");
    }

    #[test]
    fn duplicate_owner_index_is_rejected() {
        let spec = InputSpec::List(vec![
            InputEntry::new("a.png"),
            InputEntry::new("b.png").with_index(0),
        ]);
        assert!(matches!(
            spec.expand(),
            Err(InputError::DuplicateIndex { index: 0 })
        ));
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert!(matches!(
            InputSpec::List(Vec::new()).expand(),
            Err(InputError::Empty)
        ));
        let pattern = InputSpec::Pattern {
            base_folder: String::new(),
            extension: "png".to_string(),
            count: 0,
        };
        assert!(matches!(pattern.expand(), Err(InputError::EmptyPattern)));
    }
}
