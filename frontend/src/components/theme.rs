use crate::{
    api::{PreferencesUpdate, ThemeMode},
    state::{
        preferences::use_preferences,
        theme::{use_theme, Theme},
    },
};
use leptos::*;

fn mode_label(mode: ThemeMode) -> &'static str {
    match mode {
        ThemeMode::Light => "Light",
        ThemeMode::Dark => "Dark",
        ThemeMode::System => "System",
    }
}

#[component]
pub fn ThemeSelect() -> impl IntoView {
    let preferences = use_preferences();
    let theme_state = use_theme();
    let current_mode = theme_state.mode;
    let current_theme = theme_state.current();

    let on_change = move |ev| {
        if let Some(mode) = ThemeMode::parse(&event_target_value(&ev)) {
            preferences.save_in_background(PreferencesUpdate::theme(mode));
        }
    };

    view! {
        <label class="inline-flex items-center gap-2 text-sm text-gray-700 dark:text-gray-200">
            <i class=move || {
                if current_theme.get() == Theme::Dark { "fas fa-moon" } else { "fas fa-sun" }
            }></i>
            <span class="sr-only">"Theme"</span>
            <select
                class="rounded-md border border-gray-300 bg-white px-2 py-1 dark:border-gray-600 dark:bg-gray-800"
                on:change=on_change
                aria-label="Theme"
            >
                {ThemeMode::ALL
                    .into_iter()
                    .map(|mode| {
                        view! {
                            <option
                                value=mode.as_str()
                                selected=move || current_mode.get() == mode
                            >
                                {mode_label(mode)}
                            </option>
                        }
                    })
                    .collect_view()}
            </select>
        </label>
    }
}
