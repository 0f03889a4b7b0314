use std::{cell::RefCell, collections::HashMap, rc::Rc};

/// String key/value persistence that outlives a page load.
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), String>;
    fn remove_item(&self, key: &str) -> Result<(), String>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RefCell<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), String> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), String> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

#[cfg(target_arch = "wasm32")]
mod browser {
    use web_sys::{Storage, Window};

    use super::KeyValueStore;

    pub fn window() -> Result<Window, String> {
        web_sys::window().ok_or_else(|| "No window object".to_string())
    }

    pub fn local_storage() -> Result<Storage, String> {
        window()?
            .local_storage()
            .map_err(|_| "No localStorage".to_string())?
            .ok_or_else(|| "No localStorage".to_string())
    }

    /// `window.localStorage`; every call re-resolves it so a blocked
    /// storage only fails the individual operation.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct LocalStorage;

    impl KeyValueStore for LocalStorage {
        fn get_item(&self, key: &str) -> Option<String> {
            local_storage().ok()?.get_item(key).ok().flatten()
        }

        fn set_item(&self, key: &str, value: &str) -> Result<(), String> {
            local_storage()?
                .set_item(key, value)
                .map_err(|_| format!("Failed to write {}", key))
        }

        fn remove_item(&self, key: &str) -> Result<(), String> {
            local_storage()?
                .remove_item(key)
                .map_err(|_| format!("Failed to remove {}", key))
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use browser::{local_storage, window, LocalStorage};

/// The storage the app persists to: `localStorage` in the browser, an
/// in-memory map elsewhere.
pub fn browser_storage() -> Rc<dyn KeyValueStore> {
    #[cfg(target_arch = "wasm32")]
    {
        Rc::new(LocalStorage)
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        Rc::new(MemoryStorage::new())
    }
}
