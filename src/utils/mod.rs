use unicode_segmentation::UnicodeSegmentation;

/// Truncate `s` to at most `len` extended grapheme clusters for log output,
/// appending `...` when anything was cut.
pub(crate) fn preview(s: &str, len: usize) -> String {
    if s.graphemes(true).count() <= len {
        return s.to_owned();
    }
    s.graphemes(true).take(len).chain(["..."]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_pass_through() {
        assert_eq!(preview("caching", 50), "caching");
    }

    #[test]
    fn long_strings_are_cut_with_ellipsis() {
        assert_eq!(preview("abcdefgh", 3), "abc...");
    }

    #[test]
    fn truncation_counts_graphemes_not_bytes() {
        assert_eq!(preview("héllo wörld", 5), "héllo...");
    }
}
