use boxoffice_core::{Show, ShowId};
use std::collections::HashMap;
use std::sync::RwLock;

/// Registry of shows known to this process.
///
/// Shows are immutable once registered: geometry and categories never change
/// under existing locks or bookings.
#[derive(Default)]
pub struct ShowCatalog {
    shows: RwLock<HashMap<ShowId, Show>>,
}

impl ShowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, show: Show) -> Result<(), CatalogError> {
        show.layout
            .validate()
            .map_err(|e| CatalogError::InvalidLayout(e.to_string()))?;

        let mut shows = self.shows.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = shows.get(&show.id) {
            if existing == &show {
                return Ok(());
            }
            return Err(CatalogError::DuplicateShow(show.id.to_string()));
        }
        shows.insert(show.id.clone(), show);
        Ok(())
    }

    pub fn get(&self, show_id: &ShowId) -> Option<Show> {
        self.shows
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(show_id)
            .cloned()
    }

    pub fn ids(&self) -> Vec<ShowId> {
        let mut ids: Vec<ShowId> = self
            .shows
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.shows.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Show already registered with a different layout: {0}")]
    DuplicateShow(String),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),
}
