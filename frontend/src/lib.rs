use std::rc::Rc;

use leptos::*;

pub mod api;
pub mod components;
pub mod state;
pub mod utils;

use api::{ApiClient, PreferencesApi};
use components::theme::ThemeSelect;
use state::{preferences::provide_preferences, theme::provide_theme};

/// Root component: provides the preference and theme contexts, then loads
/// the signed-in user's preferences from the backend.
#[component]
pub fn App() -> impl IntoView {
    let api: Rc<dyn PreferencesApi> = Rc::new(ApiClient::new());
    let preferences = provide_preferences(Some(api));
    provide_theme();

    spawn_local(async move { preferences.load_from_api().await });

    view! {
        <header class="flex justify-end p-4">
            <ThemeSelect/>
        </header>
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    if console_log::init_with_level(log::Level::Debug).is_err() {
        web_sys::console::warn_1(&"Logger already initialized".into());
    }
    log::info!("Starting CaseLedger frontend");

    mount_to_body(|| view! { <App/> });
}
