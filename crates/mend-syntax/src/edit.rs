//! Byte-range text edits
//!
//! Transforms never mutate source in place: they collect [`TextEdit`]s into an
//! [`EditSet`] and splice a full candidate text in one pass. Overlapping edits
//! are a bug in the caller and are rejected, not resolved.

use std::ops::Range;

/// One replacement within a source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    /// Byte range being replaced
    pub range: Range<usize>,
    /// Replacement text (empty for deletion)
    pub replacement: String,
}

impl TextEdit {
    /// Replace a range with new text
    #[inline]
    #[must_use]
    pub fn replace(range: Range<usize>, replacement: impl Into<String>) -> Self {
        Self {
            range,
            replacement: replacement.into(),
        }
    }

    /// Delete a range
    #[inline]
    #[must_use]
    pub fn delete(range: Range<usize>) -> Self {
        Self {
            range,
            replacement: String::new(),
        }
    }

    /// Insert text at a position
    #[inline]
    #[must_use]
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            range: at..at,
            replacement: text.into(),
        }
    }
}

/// An ordered collection of non-overlapping edits
#[derive(Debug, Default, Clone)]
pub struct EditSet {
    edits: Vec<TextEdit>,
}

impl EditSet {
    /// Empty edit set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edit
    #[inline]
    pub fn push(&mut self, edit: TextEdit) {
        self.edits.push(edit);
    }

    /// Number of edits
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// True when no edits were collected
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Splice all edits into a full candidate text
    ///
    /// Edits are sorted by start position; insertions at the same point keep
    /// their push order.
    ///
    /// # Errors
    /// [`EditError::OutOfBounds`], [`EditError::NotCharBoundary`] or
    /// [`EditError::Overlap`]; the input is never partially applied.
    pub fn apply(mut self, source: &str) -> Result<String, EditError> {
        for edit in &self.edits {
            if edit.range.start > edit.range.end || edit.range.end > source.len() {
                return Err(EditError::OutOfBounds {
                    start: edit.range.start,
                    end: edit.range.end,
                    len: source.len(),
                });
            }
            if !source.is_char_boundary(edit.range.start) || !source.is_char_boundary(edit.range.end)
            {
                return Err(EditError::NotCharBoundary {
                    at: edit.range.start,
                });
            }
        }
        self.edits
            .sort_by(|a, b| (a.range.start, a.range.end).cmp(&(b.range.start, b.range.end)));
        for pair in self.edits.windows(2) {
            if pair[1].range.start < pair[0].range.end {
                return Err(EditError::Overlap {
                    first: pair[0].range.clone(),
                    second: pair[1].range.clone(),
                });
            }
        }

        let mut out = String::with_capacity(source.len() + 64);
        let mut last = 0;
        for edit in &self.edits {
            out.push_str(&source[last..edit.range.start]);
            out.push_str(&edit.replacement);
            last = edit.range.end;
        }
        out.push_str(&source[last..]);
        Ok(out)
    }
}

/// Edit application failures
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EditError {
    /// Range exceeds the source text
    #[error("edit range {start}..{end} out of bounds (len {len})")]
    OutOfBounds {
        /// Range start
        start: usize,
        /// Range end
        end: usize,
        /// Source length
        len: usize,
    },

    /// Range endpoint splits a UTF-8 character
    #[error("edit range endpoint {at} is not a char boundary")]
    NotCharBoundary {
        /// Offending offset
        at: usize,
    },

    /// Two edits overlap
    #[error("overlapping edits: {first:?} and {second:?}")]
    Overlap {
        /// Earlier range
        first: Range<usize>,
        /// Later range
        second: Range<usize>,
    },
}

/// Leading whitespace of the line containing `byte`
#[must_use]
pub fn indentation_of(source: &str, byte: usize) -> String {
    let upto = source.get(..byte).unwrap_or("");
    let line_start = upto.rfind('\n').map_or(0, |i| i + 1);
    source[line_start..]
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .collect()
}

/// Strip the common leading indentation from every non-blank line
#[must_use]
pub fn dedent(text: &str) -> String {
    let common = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if line.trim().is_empty() {
            continue;
        }
        out.push_str(line.get(common..).unwrap_or(""));
    }
    if text.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Prefix every non-blank line with `indent`
#[must_use]
pub fn reindent(text: &str, indent: &str) -> String {
    let mut out = String::with_capacity(text.len() + indent.len() * 4);
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if !line.trim().is_empty() {
            out.push_str(indent);
            out.push_str(line);
        }
    }
    if text.ends_with('\n') {
        out.push('\n');
    }
    out
}
