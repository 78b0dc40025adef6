//! Long-line splitting (§4.6.1 of the message-sending contract): cut a line
//! into sub-lines no longer than `max` bytes, preferring to break on
//! whitespace. The break character itself is dropped (not kept on either
//! side), so `split("hello world", 5)` yields `"hello"` then `"world"`, not
//! `"hello "` then `"world"`.

pub(crate) struct SplitIterator<'a> {
    s: Option<&'a str>,
    max: usize,
}

pub(crate) fn split_iterator(s: &str, max: usize) -> SplitIterator<'_> {
    SplitIterator { s: Some(s), max }
}

impl<'a> Iterator for SplitIterator<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.max == 0 {
            return None;
        }

        let s = self.s?;
        if s.len() <= self.max {
            self.s = None;
            return Some(s);
        }

        // Rightmost whitespace at or before byte offset `max`.
        let cut = s[..self.max.min(s.len())]
            .char_indices()
            .filter(|(_, c)| c.is_whitespace())
            .next_back();

        match cut {
            Some((idx, ch)) => {
                self.s = Some(&s[idx + ch.len_utf8()..]);
                Some(&s[..idx])
            }
            None => {
                // No whitespace to break on: hard-cut at `max`, backing off
                // to the nearest char boundary.
                let mut split = self.max;
                while split > 0 && !s.is_char_boundary(split) {
                    split -= 1;
                }
                if split == 0 {
                    split = s
                        .char_indices()
                        .nth(1)
                        .map(|(idx, _)| idx)
                        .unwrap_or(s.len());
                }
                let (head, tail) = s.split_at(split);
                self.s = Some(tail);
                Some(head)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace_and_drops_the_break_char() {
        let parts: Vec<&str> = split_iterator("hello world of irc", 10).collect();
        assert_eq!(parts, vec!["hello", "world of", "irc"]);
    }

    #[test]
    fn hard_cuts_when_no_whitespace_fits() {
        let parts: Vec<&str> = split_iterator("abcdefgh", 3).collect();
        assert_eq!(parts, vec!["abc", "def", "gh"]);
    }

    #[test]
    fn short_line_is_unsplit() {
        let parts: Vec<&str> = split_iterator("hi", 10).collect();
        assert_eq!(parts, vec!["hi"]);
    }

    #[test]
    fn empty_line_yields_one_empty_part() {
        let parts: Vec<&str> = split_iterator("", 3).collect();
        assert_eq!(parts, vec![""]);
    }

    #[test]
    fn zero_max_yields_nothing() {
        let parts: Vec<&str> = split_iterator("", 0).collect();
        assert!(parts.is_empty());
    }

    #[test]
    fn no_output_part_exceeds_max() {
        let parts: Vec<&str> = split_iterator("the quick brown fox jumps", 6).collect();
        assert!(parts.iter().all(|p| p.len() <= 6));
    }
}
