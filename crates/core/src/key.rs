//! Flat store keys for hierarchical resource ids.
//!
//! The wide-column store does not accept `/` inside partition or row keys, so
//! every resource id is stored with its path separators replaced by `!`.
//! Combination keys (anti-repeat fingerprints such as availability set +
//! domain) join already-encoded fragments with `@`. Neither reserved character
//! may appear in a real identifier.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::KeyError;

pub const PATH_SEPARATOR: char = '/';
pub const ESCAPE: char = '!';
pub const COMBINATION_SEPARATOR: char = '@';

/// Encode a resource id into a store key.
pub fn encode(path: &str) -> Result<String, KeyError> {
    if path.is_empty() {
        return Err(KeyError::Empty);
    }
    if let Some(character) = path
        .chars()
        .find(|c| *c == ESCAPE || *c == COMBINATION_SEPARATOR)
    {
        return Err(KeyError::ReservedCharacter {
            character,
            input: path.to_string(),
        });
    }
    Ok(path.replace(PATH_SEPARATOR, "!"))
}

/// Decode a store key back into the resource id it was encoded from.
pub fn decode(key: &str) -> Result<String, KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if key.contains(PATH_SEPARATOR) {
        return Err(KeyError::UnescapedSeparator(key.to_string()));
    }
    if key.contains(COMBINATION_SEPARATOR) {
        return Err(KeyError::ReservedCharacter {
            character: COMBINATION_SEPARATOR,
            input: key.to_string(),
        });
    }
    Ok(key.replace(ESCAPE, "/"))
}

/// Selection axis inside an availability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainAxis {
    Fault,
    Update,
}

impl DomainAxis {
    pub fn marker(&self) -> &'static str {
        match self {
            DomainAxis::Fault => "fault",
            DomainAxis::Update => "update",
        }
    }

    fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "fault" => Some(DomainAxis::Fault),
            "update" => Some(DomainAxis::Update),
            _ => None,
        }
    }
}

impl fmt::Display for DomainAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Anti-repeat fingerprint for a fault unit: `(set, axis, domain)` or
/// `(region, zone)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CombinationKey(String);

impl CombinationKey {
    /// Join raw fragments; each fragment is key-encoded first.
    pub fn combine<I, S>(parts: I) -> Result<Self, KeyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let encoded = parts
            .into_iter()
            .map(|p| encode(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if encoded.len() < 2 {
            return Err(KeyError::MalformedCombination(encoded.join("@")));
        }
        Ok(Self(encoded.join("@")))
    }

    /// Split back into the decoded fragments.
    pub fn split(&self) -> Result<Vec<String>, KeyError> {
        self.0.split(COMBINATION_SEPARATOR).map(decode).collect()
    }

    pub fn availability_set(set_id: &str, axis: DomainAxis, domain: u32) -> Result<Self, KeyError> {
        Self::combine([set_id, axis.marker(), domain.to_string().as_str()])
    }

    pub fn availability_zone(region: &str, zone: &str) -> Result<Self, KeyError> {
        Self::combine([region, zone])
    }

    /// The domain axis marker, for availability-set combinations only.
    pub fn axis(&self) -> Option<DomainAxis> {
        let parts: Vec<&str> = self.0.split(COMBINATION_SEPARATOR).collect();
        match parts.as_slice() {
            [_, marker, _] => DomainAxis::from_marker(marker),
            _ => None,
        }
    }

    /// Availability set id and domain number, if this is a set combination.
    pub fn set_and_domain(&self) -> Option<(String, u32)> {
        let parts = self.split().ok()?;
        match parts.as_slice() {
            [set_id, marker, domain] if DomainAxis::from_marker(marker).is_some() => {
                Some((set_id.clone(), domain.parse().ok()?))
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CombinationKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.contains(PATH_SEPARATOR) || value.split(COMBINATION_SEPARATOR).count() < 2 {
            return Err(KeyError::MalformedCombination(value));
        }
        if value.split(COMBINATION_SEPARATOR).any(str::is_empty) {
            return Err(KeyError::MalformedCombination(value));
        }
        Ok(Self(value))
    }
}

impl From<CombinationKey> for String {
    fn from(key: CombinationKey) -> Self {
        key.0
    }
}

impl fmt::Display for CombinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
