//! Path parameters captured by a route match.

use std::fmt;

/// A single captured parameter: the wildcard name from the pattern and the
/// path text it matched.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Param {
    key: String,
    value: String,
}

impl Param {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.key, self.value)
    }
}

/// Ordered list of parameters, left to right as they appear in the pattern.
///
/// `Params` lives inside a pooled [`Context`](crate::Context). Truncating
/// keeps the backing entries, and a later [`push`](Params::push) overwrites
/// an old entry's strings in place. A warmed-up context therefore captures
/// parameters without allocating.
#[derive(Clone, Default)]
pub struct Params {
    entries: Vec<Param>,
    len: usize,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of the first parameter named `key`.
    ///
    /// For the pattern `/users/:id`, `get("id")` on `/users/42` is `Some("42")`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.iter().find(|p| p.key == key).map(|p| p.value.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Param> {
        self.entries[..self.len].iter()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn push(&mut self, key: &[u8], value: &[u8]) {
        // Keys and values are cut from valid UTF-8 strings at byte positions
        // the tree only ever chooses on ASCII delimiters.
        let key = String::from_utf8_lossy(key);
        let value = String::from_utf8_lossy(value);

        if let Some(slot) = self.entries.get_mut(self.len) {
            slot.key.clear();
            slot.key.push_str(&key);
            slot.value.clear();
            slot.value.push_str(&value);
        } else {
            self.entries.push(Param { key: key.into_owned(), value: value.into_owned() });
        }
        self.len += 1;
    }

    pub(crate) fn truncate(&mut self, n: usize) {
        self.len = self.len.min(n);
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }
}

impl PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for Params {}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
