use std::collections::BTreeMap;

use super::plan::PendingFile;
use super::snapshot::{FileTreeEntity, FileTreeSnapshot, FolderId};

/// Existing entities an upload batch would collide with.
///
/// File conflicts are keyed by entity id and folder conflicts by root name,
/// so equality does not depend on the order files were added in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictSet {
    files: BTreeMap<String, FileTreeEntity>,
    folders: BTreeMap<String, FileTreeEntity>,
}

impl ConflictSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.folders.len()
    }

    pub fn file_conflicts(&self) -> Vec<&FileTreeEntity> {
        self.files.values().collect()
    }

    pub fn folder_conflicts(&self) -> Vec<&FileTreeEntity> {
        self.folders.values().collect()
    }
}

/// Computes which candidates collide with entities already in the tree.
///
/// Loose files are checked by name in their target folder. Files dropped as
/// part of a folder are checked once per folder root.
pub fn detect(
    candidates: &[PendingFile],
    snapshot: &dyn FileTreeSnapshot,
    default_folder: &FolderId,
) -> ConflictSet {
    let mut conflicts = ConflictSet::default();

    for file in candidates {
        let folder = file.effective_folder(default_folder);
        match file.root_segment() {
            None => {
                if let Some(existing) = snapshot.find_by_name_in_folder(folder, &file.name) {
                    conflicts.files.entry(existing.id.clone()).or_insert(existing);
                }
            }
            Some(root) => {
                if conflicts.folders.contains_key(root) {
                    continue;
                }
                if let Some(existing) = snapshot.find_by_name_in_folder(folder, root) {
                    conflicts.folders.insert(root.to_string(), existing);
                }
            }
        }
    }

    conflicts
}
