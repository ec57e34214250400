//! Locale propagation.

use std::fmt;
use std::str::FromStr;

use ambit_core::{
    AmbientValue, ContextError, ContextManager, ContextScope, ScopeStack, ambient, value_of,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A `language[-REGION]` tag, e.g. `nl` or `nl-NL`.
///
/// The language code is normalized to lowercase and the region code to
/// uppercase; `nl_NL` and `nl-NL` parse to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Locale {
    language: String,
    region: Option<String>,
}

impl Locale {
    /// Create a locale from a language code and optional region code.
    ///
    /// # Panics
    /// Panics if `language` is empty.
    #[must_use]
    pub fn new(language: impl Into<String>, region: Option<&str>) -> Self {
        let language = language.into().to_ascii_lowercase();
        assert!(!language.is_empty(), "language must not be empty");
        Self {
            language,
            region: region.map(str::to_ascii_uppercase),
        }
    }

    /// The lowercase language code.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// The uppercase region code, if any.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}-{}", self.language, region),
            None => f.write_str(&self.language),
        }
    }
}

/// Error parsing a [`Locale`] tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid locale tag '{0}'")]
pub struct LocaleParseError(String);

impl FromStr for Locale {
    type Err = LocaleParseError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let mut parts = tag.splitn(2, ['-', '_']);
        let language = parts.next().unwrap_or_default();
        if language.is_empty() || !language.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(LocaleParseError(tag.to_string()));
        }
        let region = match parts.next() {
            Some(region) if !region.is_empty()
                && region.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                Some(region)
            }
            Some(_) => return Err(LocaleParseError(tag.to_string())),
            None => None,
        };
        Ok(Locale::new(language, region))
    }
}

/// Manager propagating the ambient [`Locale`] via the shared per-thread
/// stack.
#[derive(Debug, Default)]
pub struct LocaleManager;

impl LocaleManager {
    /// Activate `locale` on the calling thread.
    #[must_use = "dropping the scope immediately closes it again"]
    pub fn set(locale: Locale) -> ContextScope {
        ScopeStack::<Self>::push(ambient(locale))
    }

    /// The active locale on the calling thread.
    #[must_use]
    pub fn current() -> Option<Locale> {
        ScopeStack::<Self>::active().and_then(|value| value_of::<Locale>(&value).cloned())
    }

    /// The active locale, or `fallback` when none is active.
    #[must_use]
    pub fn current_or(fallback: Locale) -> Locale {
        Self::current().unwrap_or(fallback)
    }
}

impl ContextManager for LocaleManager {
    fn activate(&self, value: AmbientValue) -> Result<ContextScope, ContextError> {
        if value_of::<Locale>(&value).is_none() {
            return Err(ContextError::activation(
                std::any::type_name::<Self>(),
                "expected a Locale value",
            ));
        }
        Ok(ScopeStack::<Self>::push(value))
    }

    fn active_value(&self) -> Option<AmbientValue> {
        ScopeStack::<Self>::active()
    }
}
