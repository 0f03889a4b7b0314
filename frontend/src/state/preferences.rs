use std::rc::Rc;

use leptos::*;

use crate::{
    api::{Preferences, PreferencesApi, PreferencesUpdate, ThemeMode},
    utils::storage::{browser_storage, KeyValueStore},
};

pub const PREFERENCES_STORAGE_KEY: &str = "caseledger.preferences";

/// Where this tab's preferences stand relative to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferencesPhase {
    /// Nothing known from the profile yet; a stored copy may be showing.
    Uninitialized,
    Loaded,
    /// Changed locally; the backend may not have the change.
    Mutated,
    Saved,
}

#[derive(Clone)]
pub struct PreferencesContext {
    preferences: RwSignal<Preferences>,
    theme_mode: Memo<ThemeMode>,
    phase: RwSignal<PreferencesPhase>,
    revision: StoredValue<u64>,
    storage: Rc<dyn KeyValueStore>,
    api: Option<Rc<dyn PreferencesApi>>,
}

impl PreferencesContext {
    pub fn new(storage: Rc<dyn KeyValueStore>, api: Option<Rc<dyn PreferencesApi>>) -> Self {
        let preferences = create_rw_signal(Preferences::default());
        Self {
            preferences,
            theme_mode: create_memo(move |_| preferences.with(|preferences| preferences.theme)),
            phase: create_rw_signal(PreferencesPhase::Uninitialized),
            revision: store_value(0),
            storage,
            api,
        }
    }

    pub fn preferences(&self) -> Signal<Preferences> {
        self.preferences.into()
    }

    /// Only notifies when the theme itself changes.
    pub fn theme_mode(&self) -> Signal<ThemeMode> {
        self.theme_mode.into()
    }

    pub fn phase(&self) -> ReadSignal<PreferencesPhase> {
        self.phase.read_only()
    }

    fn stored(&self) -> Option<Preferences> {
        let raw = self.storage.get_item(PREFERENCES_STORAGE_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(preferences) => Some(preferences),
            Err(err) => {
                log::warn!("Ignoring unreadable stored preferences: {}", err);
                None
            }
        }
    }

    fn persist(&self, preferences: &Preferences) {
        let result = serde_json::to_string(preferences)
            .map_err(|e| e.to_string())
            .and_then(|raw| self.storage.set_item(PREFERENCES_STORAGE_KEY, &raw));
        if let Err(err) = result {
            log::warn!("Failed to persist preferences: {}", err);
        }
    }

    /// Shows the stored copy from an earlier visit while the profile loads.
    pub fn hydrate_from_storage(&self) -> bool {
        if self.phase.get_untracked() != PreferencesPhase::Uninitialized {
            return false;
        }
        match self.stored() {
            Some(preferences) => {
                self.preferences.set(preferences);
                true
            }
            None => false,
        }
    }

    /// Takes the profile's preferences, or the stored copy (then the
    /// defaults) when the profile has none.
    pub fn load(&self, profile: Option<Preferences>) {
        let preferences = match profile {
            Some(preferences) => {
                self.persist(&preferences);
                preferences
            }
            None => self.stored().unwrap_or_default(),
        };
        self.preferences.set(preferences);
        self.phase.set(PreferencesPhase::Loaded);
    }

    /// Applies `update` locally and to storage. Returns the revision that
    /// a later save acknowledgement must match.
    pub fn update(&self, update: &PreferencesUpdate) -> u64 {
        self.preferences.update(|preferences| preferences.apply(update));
        self.persist(&self.preferences.get_untracked());
        self.phase.set(PreferencesPhase::Mutated);
        self.revision.update_value(|revision| *revision += 1);
        self.revision.get_value()
    }

    /// Optimistic save: local state changes first, then the backend is
    /// told. Backend failures are logged and otherwise ignored.
    pub async fn save(&self, update: PreferencesUpdate) {
        let revision = self.update(&update);
        let Some(api) = self.api.clone() else {
            log::debug!("No preferences API configured; keeping change local");
            return;
        };
        match api.save_preferences(update).await {
            Ok(_) if self.revision.get_value() == revision => {
                self.phase.set(PreferencesPhase::Saved);
            }
            Ok(_) => {}
            Err(err) => log::warn!("Failed to sync preferences: {}", err),
        }
    }

    pub fn save_in_background(&self, update: PreferencesUpdate) {
        let context = self.clone();
        spawn_local(async move { context.save(update).await });
    }

    /// Loads the profile's preferences from the backend, falling back to
    /// the stored copy when the request fails.
    pub async fn load_from_api(&self) {
        let profile = match self.api.clone() {
            Some(api) => match api.fetch_preferences().await {
                Ok(preferences) => Some(preferences),
                Err(err) => {
                    log::warn!("Failed to load preferences: {}", err);
                    None
                }
            },
            None => None,
        };
        self.load(profile);
    }
}

pub fn provide_preferences(api: Option<Rc<dyn PreferencesApi>>) -> PreferencesContext {
    let context = PreferencesContext::new(browser_storage(), api);
    context.hydrate_from_storage();
    provide_context(context.clone());
    context
}

pub fn use_preferences() -> PreferencesContext {
    use_context::<PreferencesContext>()
        .unwrap_or_else(|| PreferencesContext::new(browser_storage(), None))
}
