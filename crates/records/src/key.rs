use crate::error::{ErrorKind, Result};
use std::fmt;
use std::str::FromStr;

const SEPARATOR: char = '+';

/// Identity of a record: the source a title was found on, and the title's id
/// within that source. Rendered as `{source}+{id}`.
///
/// The source may not contain `+`; the id may, since parsing splits at the
/// first separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    source: String,
    id: String,
}

impl RecordKey {
    /// Build a key from raw request parameters. Surrounding whitespace is
    /// trimmed.
    ///
    /// ```
    /// use reel_records::RecordKey;
    /// let key = RecordKey::from_parts(" siteA ", "12345").unwrap();
    /// assert_eq!(key.to_string(), "siteA+12345");
    /// assert!(RecordKey::from_parts("", "1").is_err());
    /// ```
    pub fn from_parts(source: &str, id: &str) -> Result<Self> {
        let (source, id) = (source.trim(), id.trim());
        let raw = || format!("{source}{SEPARATOR}{id}");
        if source.is_empty() || id.is_empty() || source.contains(SEPARATOR) || [source, id].into_iter().any(unusable) {
            exn::bail!(ErrorKind::InvalidRecordKey(raw()));
        }
        Ok(Self {
            source: source.to_string(),
            id: id.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Characters that would break the storage key the record key is embedded in.
fn unusable(part: &str) -> bool {
    part.contains(['/', '\\', '\0'])
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.source, self.id)
    }
}

impl FromStr for RecordKey {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(SEPARATOR) {
            Some((source, id)) => Self::from_parts(source, id),
            None => exn::bail!(ErrorKind::InvalidRecordKey(s.to_string())),
        }
    }
}
