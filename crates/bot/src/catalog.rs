use std::sync::Arc;

use arc_swap::ArcSwap;
use carousel_slideshow::{CatalogItem, ContentCatalog};

use super::settings::Settings;

/// Catalog backed by the live settings snapshot, so a `reload` shows up on the next read.
pub struct SettingsCatalog {
    settings: Arc<ArcSwap<Settings>>,
}

impl SettingsCatalog {
    pub fn new(settings: Arc<ArcSwap<Settings>>) -> Self {
        Self { settings }
    }
}

impl ContentCatalog for SettingsCatalog {
    fn items(&self, language: &str) -> Vec<CatalogItem> {
        self.settings.load().catalog_items(language)
    }
}
