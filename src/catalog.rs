//! Message catalog lookup.
//!
//! Reply texts go through a [`Catalog`] so embedders can localise them; the
//! engine itself ships only the identity catalog.

use std::{borrow::Cow, sync::Arc};

/// Translates reply messages for one connection.
pub trait Catalog: Send + Sync {
    /// Look up the translation for `message`, falling back to the input.
    fn text<'a>(&self, message: &'a str) -> Cow<'a, str>;
}

/// Catalog returning every message unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCatalog;

impl Catalog for DefaultCatalog {
    fn text<'a>(&self, message: &'a str) -> Cow<'a, str> { Cow::Borrowed(message) }
}

/// Per-connection localization capability.
///
/// Registered in the session's feature set at connection start; handlers use
/// it through [`crate::handler::CommandContext::text`].
pub struct LocalizationFeature {
    catalog: Arc<dyn Catalog>,
    language: String,
}

impl LocalizationFeature {
    /// Create the feature with the given catalog and language tag.
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>, language: impl Into<String>) -> Self {
        Self {
            catalog,
            language: language.into(),
        }
    }

    /// The active catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn Catalog> { &self.catalog }

    /// BCP 47 tag of the active language.
    #[must_use]
    pub fn language(&self) -> &str { &self.language }
}
