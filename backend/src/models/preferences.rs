//! User interface preferences stored on the user profile.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation::rules::{validate_currency, validate_date_format, validate_timezone};

pub const PREFERENCES_FIELD: &str = "preferences";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub theme: ThemeMode,
    pub language: String,
    pub timezone: String,
    pub date_format: String,
    pub currency: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: ThemeMode::System,
            language: "en".to_string(),
            timezone: "UTC".to_string(),
            date_format: "DD/MM/YYYY".to_string(),
            currency: "USD".to_string(),
        }
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePreferencesPayload {
    pub theme: Option<ThemeMode>,
    #[validate(length(min = 2, max = 10))]
    pub language: Option<String>,
    #[validate(custom(function = "validate_timezone"))]
    pub timezone: Option<String>,
    #[validate(custom(function = "validate_date_format"))]
    pub date_format: Option<String>,
    #[validate(custom(function = "validate_currency"))]
    pub currency: Option<String>,
}

impl Preferences {
    pub fn apply(mut self, update: UpdatePreferencesPayload) -> Self {
        if let Some(theme) = update.theme {
            self.theme = theme;
        }
        if let Some(language) = update.language {
            self.language = language;
        }
        if let Some(timezone) = update.timezone {
            self.timezone = timezone;
        }
        if let Some(date_format) = update.date_format {
            self.date_format = date_format;
        }
        if let Some(currency) = update.currency {
            self.currency = currency.to_ascii_uppercase();
        }
        self
    }
}
