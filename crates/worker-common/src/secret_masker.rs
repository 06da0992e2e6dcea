// Thread-safe store of named secrets, replacing their clear values in text
// with a marker that names the secret.

use crate::constants::SECRET_MIN_LENGTH;
use parking_lot::RwLock;
use std::borrow::Cow;
use std::sync::Arc;

#[derive(Clone)]
struct NamedSecret {
    name: String,
    value: String,
}

/// Shared handle to the secrets of the current unit of work.
///
/// Clones share the same store; the job runner fills it at the start of a
/// build and clears it once the last log line has been shipped.
#[derive(Clone, Default)]
pub struct SecretMasker {
    inner: Arc<RwLock<Vec<NamedSecret>>>,
}

impl std::fmt::Debug for SecretMasker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretMasker")
            .field("count", &self.secret_count())
            .finish()
    }
}

impl SecretMasker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The text that replaces a secret's value.
    pub fn marker(name: &str) -> String {
        format!("**{name}**")
    }

    /// Register a secret. Values shorter than [`SECRET_MIN_LENGTH`] bytes are
    /// ignored, as are values already registered.
    pub fn add_secret(&self, name: &str, value: &str) {
        if value.len() < SECRET_MIN_LENGTH {
            return;
        }

        let mut secrets = self.inner.write();
        if secrets.iter().any(|s| s.value == value) {
            return;
        }
        secrets.push(NamedSecret {
            name: name.to_string(),
            value: value.to_string(),
        });
        // Longest first, so a secret containing another is masked whole.
        secrets.sort_by(|a, b| b.value.len().cmp(&a.value.len()));
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    pub fn secret_count(&self) -> usize {
        self.inner.read().len()
    }

    /// Replace every registered secret value in `input` with its marker.
    ///
    /// Occurrences that overlap are masked as one region, named after the
    /// secret whose occurrence starts first (the longest one on a tie).
    pub fn mask_secrets<'a>(&self, input: &'a str) -> Cow<'a, str> {
        let secrets = self.inner.read();
        if input.len() < SECRET_MIN_LENGTH || secrets.is_empty() {
            return Cow::Borrowed(input);
        }

        let mut matches = Vec::new();
        for (index, secret) in secrets.iter().enumerate() {
            let mut from = 0;
            while let Some(found) = input[from..].find(secret.value.as_str()) {
                let start = from + found;
                matches.push((start, start + secret.value.len(), index));
                // Step one char so overlapping occurrences are found too.
                from = start + input[start..].chars().next().map_or(1, char::len_utf8);
            }
        }
        if matches.is_empty() {
            return Cow::Borrowed(input);
        }
        // Secrets are sorted longest first, so on equal starts the index orders by length.
        matches.sort_by_key(|&(start, _, index)| (start, index));

        let mut regions: Vec<(usize, usize, usize)> = Vec::new();
        for (start, end, index) in matches {
            match regions.last_mut() {
                Some(region) if start < region.1 => region.1 = region.1.max(end),
                _ => regions.push((start, end, index)),
            }
        }

        let mut result = String::with_capacity(input.len());
        let mut copied = 0;
        for (start, end, owner) in regions {
            result.push_str(&input[copied..start]);
            result.push_str(&Self::marker(&secrets[owner].name));
            copied = end;
        }
        result.push_str(&input[copied..]);
        Cow::Owned(result)
    }
}
