//! Identifier types shared between `irc-wire` and `ircsession`.

use std::borrow::Borrow;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

/// An IRC channel name. Channel names are case insensitive (RFC 2812 §2.2), so
/// this type's `Eq`/`Hash` impls compare case-insensitively while
/// [`ChanName::as_str`] preserves the casing the server actually sent.
///
/// The session's channel table is keyed by [`ChanNameRef::key`], never by the
/// owned casing, so that `chans[k].key == k` holds structurally rather than by
/// convention.
#[derive(Debug, Clone)]
pub struct ChanName(String);

/// Borrowed form of [`ChanName`].
#[derive(Debug)]
pub struct ChanNameRef(str);

impl Deref for ChanName {
    type Target = ChanNameRef;

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

impl AsRef<ChanNameRef> for ChanName {
    fn as_ref(&self) -> &ChanNameRef {
        ChanNameRef::new(self.0.as_ref())
    }
}

impl Borrow<ChanNameRef> for ChanName {
    fn borrow(&self) -> &ChanNameRef {
        self.as_ref()
    }
}

impl From<String> for ChanName {
    fn from(name: String) -> Self {
        ChanName(name)
    }
}

impl From<&str> for ChanName {
    fn from(name: &str) -> Self {
        ChanName(name.to_owned())
    }
}

impl std::fmt::Display for ChanName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for ChanNameRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Casemapping rules (RFC 2812 §2.2, "rfc1459" casemapping):
// - ASCII letters fold to lowercase.
// - '[', ']', '\\', '~' fold to '{', '}', '|', '^' respectively.
// - Everything else is left alone.
fn fold(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        _ => c.to_ascii_lowercase(),
    }
}

impl ChanName {
    pub fn new(name: String) -> Self {
        ChanName(name)
    }

    /// The name exactly as received from (or sent to) the server.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ChanNameRef {
    pub fn new(name: &str) -> &Self {
        unsafe { &*(name as *const str as *const ChanNameRef) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The case-folded string used as the channel table key.
    pub fn key(&self) -> String {
        self.0.chars().map(fold).collect()
    }
}

impl ToOwned for ChanNameRef {
    type Owned = ChanName;

    fn to_owned(&self) -> Self::Owned {
        ChanName(self.0.to_owned())
    }
}

impl PartialEq for ChanName {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref() == other.as_ref()
    }
}

impl Eq for ChanName {}

impl PartialEq<ChanNameRef> for ChanName {
    fn eq(&self, other: &ChanNameRef) -> bool {
        self.as_ref() == other
    }
}

impl Hash for ChanName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_ref().hash(state)
    }
}

impl PartialEq for ChanNameRef {
    fn eq(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            // ASCII folding never changes UTF-8 byte length, so unequal byte
            // lengths would still need the full fold to rule out, but this
            // is the uncommon path (differently-cased names are same length).
            return self.key() == other.key();
        }
        self.0.chars().map(fold).eq(other.0.chars().map(fold))
    }
}

impl Eq for ChanNameRef {}

impl PartialEq<ChanName> for ChanNameRef {
    fn eq(&self, other: &ChanName) -> bool {
        self == other.as_ref()
    }
}

impl Hash for ChanNameRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for c in self.0.chars() {
            fold(c).hash(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_eq() {
        let a = ChanName::new("#RustLang".to_owned());
        let b = ChanNameRef::new("#rustlang");
        assert_eq!(a, *b);
    }

    #[test]
    fn key_folds_brackets() {
        let n = ChanNameRef::new("#Foo[Bar]");
        assert_eq!(n.key(), "#foo{bar}");
    }

    #[test]
    fn display_preserves_case() {
        let a = ChanName::new("#RustLang".to_owned());
        assert_eq!(a.as_str(), "#RustLang");
    }
}
