use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
}

impl ThemeMode {
    pub const ALL: [ThemeMode; 3] = [ThemeMode::Light, ThemeMode::Dark, ThemeMode::System];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThemeMode::Light => "light",
            ThemeMode::Dark => "dark",
            ThemeMode::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.as_str() == value)
    }
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

/// Partial preference change; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<ThemeMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl PreferencesUpdate {
    pub fn theme(theme: ThemeMode) -> Self {
        Self {
            theme: Some(theme),
            ..Self::default()
        }
    }
}

impl Preferences {
    pub fn apply(&mut self, update: &PreferencesUpdate) {
        if let Some(theme) = update.theme {
            self.theme = theme;
        }
        if let Some(language) = &update.language {
            self.language = language.clone();
        }
        if let Some(timezone) = &update.timezone {
            self.timezone = timezone.clone();
        }
        if let Some(date_format) = &update.date_format {
            self.date_format = date_format.clone();
        }
        if let Some(currency) = &update.currency {
            self.currency = currency.to_ascii_uppercase();
        }
    }
}

/// Error body returned by the backend, or a client-side stand-in with the
/// same shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct ApiError {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<ApiError> for String {
    fn from(error: ApiError) -> Self {
        error.error
    }
}

impl ApiError {
    pub fn unknown(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            code: "UNKNOWN".to_string(),
            details: None,
        }
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            code: "REQUEST_FAILED".to_string(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preferences_fill_missing_fields_with_defaults() {
        let preferences: Preferences = serde_json::from_value(json!({"theme": "dark"})).unwrap();
        assert_eq!(preferences.theme, ThemeMode::Dark);
        assert_eq!(preferences.currency, "USD");
    }

    #[test]
    fn update_serializes_only_changed_fields() {
        let update = PreferencesUpdate::theme(ThemeMode::Light);
        assert_eq!(serde_json::to_value(&update).unwrap(), json!({"theme": "light"}));

        let mut preferences = Preferences::default();
        preferences.apply(&PreferencesUpdate {
            currency: Some("eur".into()),
            ..PreferencesUpdate::default()
        });
        assert_eq!(preferences.currency, "EUR");
        assert_eq!(preferences.theme, ThemeMode::System);
    }

    #[test]
    fn theme_modes_parse_their_wire_names() {
        for mode in ThemeMode::ALL {
            assert_eq!(ThemeMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(ThemeMode::parse("sepia"), None);
    }

    #[test]
    fn api_error_displays_its_message() {
        let error = ApiError::request_failed("network down");
        assert_eq!(error.to_string(), "network down");
        assert_eq!(error.code, "REQUEST_FAILED");
    }
}
