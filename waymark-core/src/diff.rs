//! Structural diffs and location translation.
//!
//! The diff algorithm itself is external (`similar` here, git's own diff in
//! the revision source); this module owns the text normalisation both sides
//! go through and the rules for carrying a range across a diff.

use similar::{capture_diff_slices, Algorithm, DiffTag};

use crate::types::{LocationMeta, MarkerLocation};

/// Unifies line endings to `\n` and strips a single trailing terminator, so
/// that adding or removing a final newline never registers as a change.
pub fn normalize(text: &str) -> String {
    let mut out = text.replace("\r\n", "\n").replace('\r', "\n");
    if out.ends_with('\n') {
        out.pop();
    }
    out
}

/// One changed region. Line indices are 0-based; a zero `old_len` is a pure
/// insertion before old line `old_start`, a zero `new_len` a pure deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u32,
    pub old_len: u32,
    pub new_start: u32,
    pub new_len: u32,
}

impl Hunk {
    fn old_end(&self) -> u32 {
        self.old_start + self.old_len
    }

    fn delta(&self) -> i64 {
        i64::from(self.new_len) - i64::from(self.old_len)
    }
}

/// Hunk list of a diff between two normalised texts, plus the character
/// length of every line of the new text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralDiff {
    hunks: Vec<Hunk>,
    new_line_lengths: Vec<u32>,
}

impl StructuralDiff {
    /// Builds a diff from hunks produced elsewhere. `new_text` must already
    /// be normalised. Hunks are sorted and adjacent ones coalesced.
    pub fn from_hunks(mut hunks: Vec<Hunk>, new_text: &str) -> Self {
        hunks.sort_by_key(|h| (h.old_start, h.new_start));
        let mut merged: Vec<Hunk> = Vec::with_capacity(hunks.len());
        for h in hunks {
            match merged.last_mut() {
                Some(prev)
                    if prev.old_end() == h.old_start
                        && prev.new_start + prev.new_len == h.new_start =>
                {
                    prev.old_len += h.old_len;
                    prev.new_len += h.new_len;
                }
                _ => merged.push(h),
            }
        }
        Self { hunks: merged, new_line_lengths: line_lengths(new_text) }
    }

    /// Normalises both texts and diffs them line by line.
    pub fn between(old: &str, new: &str) -> Self {
        let old = normalize(old);
        let new = normalize(new);
        let old_lines: Vec<&str> = old.split('\n').collect();
        let new_lines: Vec<&str> = new.split('\n').collect();

        let hunks = capture_diff_slices(Algorithm::Myers, &old_lines, &new_lines)
            .into_iter()
            .filter_map(|op| {
                let (tag, old_range, new_range) = op.as_tag_tuple();
                if tag == DiffTag::Equal {
                    return None;
                }
                Some(Hunk {
                    old_start: old_range.start as u32,
                    old_len: old_range.len() as u32,
                    new_start: new_range.start as u32,
                    new_len: new_range.len() as u32,
                })
            })
            .collect();

        Self::from_hunks(hunks, &new)
    }

    pub fn hunks(&self) -> &[Hunk] {
        &self.hunks
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    fn line_len(&self, line: u32) -> u32 {
        self.new_line_lengths.get(line as usize).copied().unwrap_or(0)
    }

    /// Maps a single old-text position. Returns the new position and whether
    /// it sat on a changed line.
    fn map_position(&self, line: u32, col: u32) -> ((u32, u32), bool) {
        let mut offset: i64 = 0;
        for h in &self.hunks {
            if line >= h.old_end() {
                offset += h.delta();
                continue;
            }
            if line < h.old_start {
                break;
            }
            let idx = line - h.old_start;
            if idx < h.new_len {
                let new_line = h.new_start + idx;
                return (self.clamp(new_line, col), true);
            }
            return (self.clamp(h.new_start + h.new_len, 0), true);
        }
        let new_line = (i64::from(line) + offset).max(0) as u32;
        (self.clamp(new_line, col), false)
    }

    fn clamp(&self, line: u32, col: u32) -> (u32, u32) {
        let last = self.new_line_lengths.len().saturating_sub(1) as u32;
        if line > last {
            return (last, self.line_len(last));
        }
        (line, col.min(self.line_len(line)))
    }

    /// True when a hunk touches the old line span `[start, end]`, including
    /// insertions strictly between the first and last line.
    fn touches(&self, start: u32, end: u32) -> bool {
        self.hunks.iter().any(|h| {
            if h.old_len == 0 {
                start < h.old_start && h.old_start <= end
            } else {
                h.old_start <= end && start < h.old_end()
            }
        })
    }
}

fn line_lengths(normalized: &str) -> Vec<u32> {
    normalized.split('\n').map(|l| l.chars().count() as u32).collect()
}

/// Carries `location` (old-text coordinates) through `diff`.
///
/// Never fails. A range whose lines were all deleted collapses to a
/// zero-width location with `content_changed` set.
pub fn translate_location(location: &MarkerLocation, diff: &StructuralDiff) -> MarkerLocation {
    let ((ls, cs), start_changed) = diff.map_position(location.line_start, location.col_start);
    let ((mut le, mut ce), end_changed) = diff.map_position(location.line_end, location.col_end);

    if (le, ce) < (ls, cs) {
        le = ls;
        ce = cs;
    }

    let content_changed = start_changed
        || end_changed
        || diff.touches(location.line_start, location.line_end);

    MarkerLocation {
        line_start: ls,
        col_start: cs,
        line_end: le,
        col_end: ce,
        meta: LocationMeta { content_changed, entirely_deleted: false },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(ls: u32, cs: u32, le: u32, ce: u32) -> MarkerLocation {
        MarkerLocation::new(ls, cs, le, ce)
    }

    #[test]
    fn normalize_unifies_endings_and_strips_one_terminator() {
        assert_eq!(normalize("a\r\nb\rc\n"), "a\nb\nc");
        assert_eq!(normalize("a\n\n"), "a\n");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn prepended_line_shifts_range_down() {
        let diff = StructuralDiff::between("foo\nbar\n", "baz\nfoo\nbar\n");
        let moved = translate_location(&loc(0, 0, 0, 3), &diff);
        assert_eq!(moved.bare(), loc(1, 0, 1, 3));
        assert!(!moved.meta.content_changed);
    }

    #[test]
    fn lines_above_edit_keep_coordinates() {
        let diff = StructuralDiff::between("a\nb\nc\nd", "a\nb\nc\nX\nd");
        let moved = translate_location(&loc(1, 0, 2, 1), &diff);
        assert_eq!(moved, loc(1, 0, 2, 1));
    }

    #[test]
    fn deleted_range_collapses_to_zero_width() {
        let diff = StructuralDiff::between("foo\nbar\nbaz", "foo\nbaz");
        let moved = translate_location(&loc(1, 0, 1, 3), &diff);
        assert!(moved.is_zero_width());
        assert_eq!(moved.bare(), loc(1, 0, 1, 0));
        assert!(moved.meta.content_changed);
    }

    #[test]
    fn deletion_at_end_of_file_clamps_to_last_line() {
        let diff = StructuralDiff::between("foo\nbar", "foo");
        let moved = translate_location(&loc(1, 0, 1, 3), &diff);
        assert!(moved.is_zero_width());
        assert_eq!(moved.bare(), loc(0, 3, 0, 3));
    }

    #[test]
    fn edited_line_keeps_position_and_flags_change() {
        let diff = StructuralDiff::between("foo\nbar", "fo\nbar");
        let moved = translate_location(&loc(0, 0, 0, 3), &diff);
        assert_eq!(moved.bare(), loc(0, 0, 0, 2));
        assert!(moved.meta.content_changed);
    }

    #[test]
    fn insertion_inside_range_extends_it() {
        let diff = StructuralDiff::between("a\nb\nc", "a\nb\nnew\nc");
        let moved = translate_location(&loc(0, 0, 2, 1), &diff);
        assert_eq!(moved.bare(), loc(0, 0, 3, 1));
        assert!(moved.meta.content_changed);
    }

    #[test]
    fn trailing_newline_is_invisible() {
        let l = loc(0, 1, 1, 2);
        let a = translate_location(&l, &StructuralDiff::between("x\nfoo\nbar", "y\nx\nfoo\nbar\n"));
        let b = translate_location(&l, &StructuralDiff::between("x\nfoo\nbar\n", "y\nx\nfoo\nbar"));
        assert_eq!(a, b);
        assert_eq!(a, loc(1, 1, 2, 2));
        assert!(StructuralDiff::between("a\r\nb\r\n", "a\nb").is_empty());
    }

    #[test]
    fn adjacent_hunks_are_coalesced() {
        let diff = StructuralDiff::from_hunks(
            vec![
                Hunk { old_start: 3, old_len: 1, new_start: 3, new_len: 0 },
                Hunk { old_start: 1, old_len: 2, new_start: 1, new_len: 2 },
            ],
            "a\nb\nc",
        );
        assert_eq!(diff.hunks(), &[Hunk { old_start: 1, old_len: 3, new_start: 1, new_len: 2 }]);
    }
}
