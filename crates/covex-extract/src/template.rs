//! Year substitution in tile paths and column names.
//!
//! A [`YearTemplate`] names its token explicitly. Rendering always starts
//! from the original template, so rendering for one year and then another
//! gives the same result as rendering the second year directly.

use crate::{ExtractError, Result};
use std::borrow::Cow;

/// Token used when a descriptor does not name one.
pub const DEFAULT_YEAR_TOKEN: &str = "{year}";

/// A string with a named year token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearTemplate {
    template: String,
    token: String,
}

impl YearTemplate {
    /// Create a template with an explicit token.
    pub fn new(template: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            token: token.into(),
        }
    }

    /// Create a template using [`DEFAULT_YEAR_TOKEN`].
    pub fn with_default_token(template: impl Into<String>) -> Self {
        Self::new(template, DEFAULT_YEAR_TOKEN)
    }

    /// The original template text.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The token that gets replaced.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the template contains the token.
    pub fn has_token(&self) -> bool {
        !self.token.is_empty() && self.template.contains(&self.token)
    }

    /// Whether the token is a `{...}` placeholder rather than a literal year.
    ///
    /// A placeholder template cannot be used as-is; a literal one (say a
    /// path embedding `2020`) is valid without substitution.
    pub fn is_placeholder(&self) -> bool {
        self.token.len() > 2 && self.token.starts_with('{') && self.token.ends_with('}')
    }

    /// Substitute `year` for every occurrence of the token.
    pub fn render(&self, year: i32) -> Result<String> {
        if !self.has_token() {
            return Err(ExtractError::TemplateMissingToken {
                template: self.template.clone(),
                token: self.token.clone(),
            });
        }
        Ok(self.template.replace(&self.token, &year.to_string()))
    }

    /// Render for an optional year.
    ///
    /// Without a year the template is returned unchanged, unless it holds an
    /// unfilled placeholder.
    pub fn resolve(&self, year: Option<i32>) -> Result<Cow<'_, str>> {
        match year {
            Some(year) => self.render(year).map(Cow::Owned),
            None if self.is_placeholder() && self.has_token() => Err(ExtractError::YearRequired {
                template: self.template.clone(),
            }),
            None => Ok(Cow::Borrowed(&self.template)),
        }
    }

    /// Check that the template can be resolved for `year`.
    pub fn validate(&self, year: Option<i32>) -> Result<()> {
        self.resolve(year).map(|_| ())
    }
}
