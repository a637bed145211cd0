//! Case-insensitive HTTP header storage.
//!
//! [`HttpHeaders`] keeps every value of a repeated header in an
//! [`http::HeaderMap`], but reads them back as one string: single-valued
//! headers return their first occurrence, list headers are joined with `", "`.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::fmt;

/// Headers whose repeated occurrences are not combinable into one list.
static SINGLE_VALUED: [HeaderName; 8] = [
    header::HOST,
    header::CONTENT_LENGTH,
    header::CONTENT_TYPE,
    header::AUTHORIZATION,
    header::COOKIE,
    header::SET_COOKIE,
    header::DATE,
    header::ETAG,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    inner: HeaderMap,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// The value of `name` as one string, or `None` when absent.
    pub fn get(&self, name: impl AsRef<str>) -> Option<String> {
        let name = name.as_ref();
        let mut values = self.inner.get_all(name).iter().map(|value| String::from_utf8_lossy(value.as_bytes()));
        let first = values.next()?;
        if is_single_valued(name) {
            return Some(first.into_owned());
        }

        let mut joined = first.into_owned();
        for value in values {
            joined.push_str(", ");
            joined.push_str(&value);
        }
        Some(joined)
    }

    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.inner.contains_key(name.as_ref())
    }

    /// Adds a value, keeping any existing ones.
    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.inner.append(name, value);
    }

    /// Replaces every value of `name`.
    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        self.inner.insert(name, value);
    }

    pub fn remove(&mut self, name: impl AsRef<str>) {
        self.inner.remove(name.as_ref());
    }

    /// Parses a `Name: value` line and appends it.
    ///
    /// Returns `false` without touching the headers when the line has no colon
    /// or its name or value is not a valid header token.
    pub fn append_line(&mut self, line: &str) -> bool {
        let Some((name, value)) = line.split_once(':') else {
            return false;
        };
        let Ok(name) = HeaderName::from_bytes(name.trim().as_bytes()) else {
            return false;
        };
        let Ok(value) = HeaderValue::from_str(value.trim()) else {
            return false;
        };
        self.inner.append(name, value);
        true
    }

    /// Number of stored values, counting repeats.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> header::Iter<'_, HeaderValue> {
        self.inner.iter()
    }

    pub fn as_map(&self) -> &HeaderMap {
        &self.inner
    }

    pub fn into_inner(self) -> HeaderMap {
        self.inner
    }
}

fn is_single_valued(name: &str) -> bool {
    SINGLE_VALUED.iter().any(|single| single.as_str().eq_ignore_ascii_case(name))
}

impl From<HeaderMap> for HttpHeaders {
    fn from(inner: HeaderMap) -> Self {
        Self { inner }
    }
}

impl<'a> IntoIterator for &'a HttpHeaders {
    type Item = (&'a HeaderName, &'a HeaderValue);
    type IntoIter = header::Iter<'a, HeaderValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

impl fmt::Display for HttpHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            writeln!(f, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
        }
        Ok(())
    }
}
