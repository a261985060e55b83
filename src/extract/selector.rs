//! Declarative field rules for detail pages
//!
//! A [`FieldRule`] names a CSS selector, what to read from the matched element
//! and how to post-process the value. Rules come from `[[detail-field]]`
//! tables in the config and are interpreted by a fixed `match`; nothing in a
//! rule is ever executed.

use crate::extract::parser::clean_field_name;
use crate::extract::DetailMap;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

/// What to read from a matched element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Extraction {
    /// All descendant text
    #[default]
    Text,
    /// The value of one attribute
    Attr { name: String },
    /// Text of direct child text nodes only
    OwnText,
}

/// Post-processing applied to an extracted value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    #[default]
    None,
    /// Trim and collapse internal whitespace
    Trim,
    /// Normalise into a snake_case key
    FieldName,
    /// `$1,234.50` -> `1234.50`
    Money,
    /// Keep digits only
    Integer,
}

/// One configured detail field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Key the value is stored under
    pub name: String,

    /// Primary CSS selector
    pub selector: String,

    #[serde(default)]
    pub extract: Extraction,

    #[serde(default)]
    pub transform: Transform,

    /// Selectors tried in order when the primary one yields nothing
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl FieldRule {
    /// Checks that the primary and fallback selectors are valid CSS
    pub fn check_selectors(&self) -> Result<(), String> {
        for selector in self.selectors() {
            if Selector::parse(selector).is_err() {
                return Err(format!(
                    "invalid selector '{}' for detail-field '{}'",
                    selector, self.name
                ));
            }
        }
        Ok(())
    }

    fn selectors(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.selector.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }

    /// Evaluates the rule against a parsed document
    ///
    /// Returns the first non-empty, successfully transformed value found by
    /// the primary selector or any fallback.
    pub fn apply(&self, document: &Html) -> Option<String> {
        for raw in self.selectors() {
            let Ok(selector) = Selector::parse(raw) else {
                continue;
            };

            let found = document
                .select(&selector)
                .filter_map(|element| self.read(element))
                .find_map(|value| self.transform.apply(&value));

            if found.is_some() {
                return found;
            }
        }
        None
    }

    fn read(&self, element: ElementRef<'_>) -> Option<String> {
        let value = match &self.extract {
            Extraction::Text => element.text().collect::<String>(),
            Extraction::Attr { name } => element.value().attr(name)?.to_string(),
            Extraction::OwnText => element
                .children()
                .filter_map(|node| node.value().as_text())
                .map(|text| text.to_string())
                .collect::<String>(),
        };

        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl Transform {
    pub fn apply(&self, value: &str) -> Option<String> {
        match self {
            Self::None => Some(value.to_string()),
            Self::Trim => Some(value.split_whitespace().collect::<Vec<_>>().join(" ")),
            Self::FieldName => Some(clean_field_name(value)),
            Self::Money => {
                let cleaned: String = value
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                    .collect();
                cleaned.parse::<f64>().ok().map(|_| cleaned)
            }
            Self::Integer => {
                let digits: String = value.chars().filter(char::is_ascii_digit).collect();
                if digits.is_empty() {
                    None
                } else {
                    Some(digits)
                }
            }
        }
    }
}

/// Applies every rule to `document`, inserting hits into `detail`
///
/// A rule that matches overwrites whatever the built-in parser stored under
/// the same name.
pub fn apply_rules(rules: &[FieldRule], document: &Html, detail: &mut DetailMap) {
    for rule in rules {
        if let Some(value) = rule.apply(document) {
            detail.insert(rule.name.clone(), value);
        }
    }
}
