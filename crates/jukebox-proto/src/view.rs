//! Catalog grouped by category, derived from `SessionState::playlists`.

use std::collections::HashMap;

use crate::protocol::Playlist;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryGroup {
    pub name: String,
    pub playlists: Vec<Playlist>,
}

/// Categories in order of first appearance; playlists within a category keep
/// their source order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupedView {
    groups: Vec<CategoryGroup>,
}

impl GroupedView {
    pub fn build(playlists: &[Playlist]) -> Self {
        let mut groups: Vec<CategoryGroup> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for playlist in playlists {
            let slot = *index.entry(playlist.category.as_str()).or_insert_with(|| {
                groups.push(CategoryGroup {
                    name: playlist.category.clone(),
                    playlists: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].playlists.push(playlist.clone());
        }

        Self { groups }
    }

    pub fn groups(&self) -> &[CategoryGroup] {
        &self.groups
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.name.as_str())
    }

    pub fn get(&self, category: &str) -> Option<&[Playlist]> {
        self.groups
            .iter()
            .find(|g| g.name == category)
            .map(|g| g.playlists.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn playlist_count(&self) -> usize {
        self.groups.iter().map(|g| g.playlists.len()).sum()
    }
}
