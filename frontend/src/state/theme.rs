use std::rc::Rc;

use leptos::*;

use crate::{api::ThemeMode, state::preferences::use_preferences};

const DARK_CLASS: &str = "dark";
#[cfg(target_arch = "wasm32")]
const DARK_SCHEME_QUERY: &str = "(prefers-color-scheme: dark)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn as_class(&self) -> &'static str {
        match self {
            Theme::Light => "",
            Theme::Dark => DARK_CLASS,
        }
    }
}

pub fn resolve_theme(mode: ThemeMode, system_prefers_dark: bool) -> Theme {
    match mode {
        ThemeMode::Light => Theme::Light,
        ThemeMode::Dark => Theme::Dark,
        ThemeMode::System if system_prefers_dark => Theme::Dark,
        ThemeMode::System => Theme::Light,
    }
}

/// Reads the OS color scheme once, at the moment of the call.
#[cfg(target_arch = "wasm32")]
pub fn system_prefers_dark() -> bool {
    web_sys::window()
        .and_then(|w| w.match_media(DARK_SCHEME_QUERY).ok().flatten())
        .map(|m| m.matches())
        .unwrap_or(false)
}

#[cfg(not(target_arch = "wasm32"))]
pub fn system_prefers_dark() -> bool {
    false
}

#[derive(Clone)]
pub struct ThemeState {
    pub mode: Signal<ThemeMode>,
    pub theme: Memo<Theme>,
}

impl ThemeState {
    /// The effective theme is recomputed when `mode` changes; the OS scheme
    /// is sampled at that point and not watched afterwards.
    pub fn new(mode: Signal<ThemeMode>, prefers_dark: Rc<dyn Fn() -> bool>) -> Self {
        let theme = create_memo(move |_| resolve_theme(mode.get(), prefers_dark()));
        Self { mode, theme }
    }

    pub fn current(&self) -> Signal<Theme> {
        self.theme.into()
    }

    #[cfg(target_arch = "wasm32")]
    fn apply_to_dom(theme: Theme) {
        let Some(root) = web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.document_element())
        else {
            return;
        };
        let class_list = root.class_list();
        let result = match theme {
            Theme::Dark => class_list.add_1(DARK_CLASS),
            Theme::Light => class_list.remove_1(DARK_CLASS),
        };
        if result.is_err() {
            log::warn!("Failed to apply {:?} theme to the document", theme);
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn apply_to_dom(_theme: Theme) {}
}

pub fn use_theme() -> ThemeState {
    use_context::<ThemeState>().unwrap_or_else(|| {
        ThemeState::new(use_preferences().theme_mode(), Rc::new(system_prefers_dark))
    })
}

/// Derives the theme from the provided preferences and keeps the document
/// root's `dark` class in step with it.
pub fn provide_theme() -> ThemeState {
    let state = ThemeState::new(use_preferences().theme_mode(), Rc::new(system_prefers_dark));
    provide_context(state.clone());

    let theme = state.theme;
    create_effect(move |_| ThemeState::apply_to_dom(theme.get()));

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::PreferencesUpdate, state::preferences::PreferencesContext,
        utils::storage::MemoryStorage,
    };
    use leptos::create_runtime;
    use std::cell::Cell;

    #[test]
    fn explicit_modes_ignore_the_system_scheme() {
        assert_eq!(resolve_theme(ThemeMode::Light, true), Theme::Light);
        assert_eq!(resolve_theme(ThemeMode::Dark, false), Theme::Dark);
        assert_eq!(resolve_theme(ThemeMode::System, true), Theme::Dark);
        assert_eq!(resolve_theme(ThemeMode::System, false), Theme::Light);
    }

    #[test]
    fn system_mode_samples_the_scheme_only_when_mode_changes() {
        let runtime = create_runtime();
        let os_dark = Rc::new(Cell::new(true));
        let mode = create_rw_signal(ThemeMode::System);
        let scheme = os_dark.clone();
        let state = ThemeState::new(mode.into(), Rc::new(move || scheme.get()));

        assert_eq!(state.current().get(), Theme::Dark);

        os_dark.set(false);
        assert_eq!(state.current().get(), Theme::Dark);

        mode.set(ThemeMode::Light);
        assert_eq!(state.current().get(), Theme::Light);
        mode.set(ThemeMode::System);
        assert_eq!(state.current().get(), Theme::Light);
        runtime.dispose();
    }

    #[test]
    fn unrelated_preference_changes_do_not_resample_the_scheme() {
        let runtime = create_runtime();
        let preferences = PreferencesContext::new(Rc::new(MemoryStorage::new()), None);
        let samples = Rc::new(Cell::new(0));
        let counter = samples.clone();
        let state = ThemeState::new(
            preferences.theme_mode(),
            Rc::new(move || {
                counter.set(counter.get() + 1);
                false
            }),
        );
        assert_eq!(state.current().get(), Theme::Light);
        assert_eq!(samples.get(), 1);

        preferences.update(&PreferencesUpdate {
            language: Some("fr".into()),
            currency: Some("eur".into()),
            ..PreferencesUpdate::default()
        });
        assert_eq!(state.current().get(), Theme::Light);
        assert_eq!(samples.get(), 1);

        preferences.update(&PreferencesUpdate::theme(ThemeMode::Dark));
        assert_eq!(state.current().get(), Theme::Dark);
        assert_eq!(samples.get(), 2);
        runtime.dispose();
    }

    #[test]
    fn host_has_no_dark_preference() {
        assert!(!system_prefers_dark());
    }
}
