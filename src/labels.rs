use std::collections::BTreeMap;

use crate::error::RestoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capitalization {
    Keep,
    /// Upper-case the first letter of the word.
    First,
    /// Upper-case the whole word.
    All,
}

/// A punctuation/capitalization label.
///
/// Names read as `<punctuation><capitalization>`: a trailing `U` upper-cases
/// the first letter, a trailing `A` the whole word, and whatever precedes it
/// is appended after the word. `O`, `0` and the empty prefix mean no
/// punctuation, so `O`, `,`, `U`, `.U` and `?A` are all valid names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub punctuation: Option<String>,
    pub capitalization: Capitalization,
}

impl Label {
    pub fn parse(name: &str) -> Self {
        let (rest, capitalization) = match name.chars().last() {
            Some('U') => (&name[..name.len() - 1], Capitalization::First),
            Some('A') => (&name[..name.len() - 1], Capitalization::All),
            _ => (name, Capitalization::Keep),
        };
        let punctuation = match rest {
            "" | "O" | "0" => None,
            p => Some(p.to_string()),
        };
        Self {
            name: name.to_string(),
            punctuation,
            capitalization,
        }
    }

    /// Applies the label to one word.
    pub fn decorate(&self, word: &str) -> String {
        let mut out = match self.capitalization {
            Capitalization::Keep => word.to_string(),
            Capitalization::All => word.to_uppercase(),
            Capitalization::First => {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        };
        if let Some(p) = &self.punctuation {
            out.push_str(p);
        }
        out
    }
}

/// Labels indexed by model class id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<Label>,
}

impl LabelSet {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Result<Self, RestoreError> {
        if names.is_empty() {
            return Err(RestoreError::invalid_input("label set is empty"));
        }
        Ok(Self {
            labels: names.iter().map(|n| Label::parse(n.as_ref())).collect(),
        })
    }

    /// Builds the set from a Hugging Face `id2label` map. Ids must be the
    /// dense range `0..n`.
    pub fn from_id2label(id2label: &BTreeMap<String, String>) -> Result<Self, RestoreError> {
        let mut by_id: Vec<Option<&str>> = vec![None; id2label.len()];
        for (id, name) in id2label {
            let idx: usize = id.parse().map_err(|_| {
                RestoreError::invalid_input(format!("id2label key '{id}' is not an integer"))
            })?;
            let slot = by_id.get_mut(idx).ok_or_else(|| {
                RestoreError::invalid_input(format!(
                    "id2label id {idx} out of range for {} labels",
                    id2label.len()
                ))
            })?;
            *slot = Some(name.as_str());
        }
        let names = by_id
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                name.ok_or_else(|| {
                    RestoreError::invalid_input(format!("id2label is missing id {idx}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(&names)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Label, RestoreError> {
        self.labels.get(index).ok_or_else(|| {
            RestoreError::model_output(format!(
                "label index {index} out of range for {} labels",
                self.labels.len()
            ))
        })
    }
}
