use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FolderId(pub String);

impl FolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Doc,
    File,
    Folder,
}

/// An existing node of the project tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileTreeEntity {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
    pub parent_folder_id: FolderId,
}

/// Read-only view of the project tree used for conflict detection.
pub trait FileTreeSnapshot {
    fn find_by_name_in_folder(&self, folder_id: &FolderId, name: &str) -> Option<FileTreeEntity>;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FolderNode {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub folders: Vec<FolderNode>,
    #[serde(default)]
    pub docs: Vec<LeafNode>,
    #[serde(default, rename = "fileRefs")]
    pub file_refs: Vec<LeafNode>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LeafNode {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

/// Project tree in the shape the editor serves it: a root folder with nested
/// `folders`, `docs` and `fileRefs`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ProjectTree {
    root: FolderNode,
}

impl ProjectTree {
    pub fn new(root_id: impl Into<String>) -> Self {
        Self {
            root: FolderNode {
                id: root_id.into(),
                name: "rootFolder".to_string(),
                folders: Vec::new(),
                docs: Vec::new(),
                file_refs: Vec::new(),
            },
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn root_folder_id(&self) -> FolderId {
        FolderId::new(self.root.id.clone())
    }

    pub fn with_folder(mut self, parent: &str, id: &str, name: &str) -> Self {
        if let Some(folder) = find_folder_mut(&mut self.root, parent) {
            folder.folders.push(FolderNode {
                id: id.to_string(),
                name: name.to_string(),
                folders: Vec::new(),
                docs: Vec::new(),
                file_refs: Vec::new(),
            });
        }
        self
    }

    pub fn with_doc(mut self, parent: &str, id: &str, name: &str) -> Self {
        if let Some(folder) = find_folder_mut(&mut self.root, parent) {
            folder.docs.push(leaf(id, name));
        }
        self
    }

    pub fn with_file(mut self, parent: &str, id: &str, name: &str) -> Self {
        if let Some(folder) = find_folder_mut(&mut self.root, parent) {
            folder.file_refs.push(leaf(id, name));
        }
        self
    }
}

impl FileTreeSnapshot for ProjectTree {
    fn find_by_name_in_folder(&self, folder_id: &FolderId, name: &str) -> Option<FileTreeEntity> {
        let folder = find_folder(&self.root, folder_id.as_str())?;
        let entity = |id: &str, kind| FileTreeEntity {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            parent_folder_id: folder_id.clone(),
        };

        if let Some(doc) = folder.docs.iter().find(|doc| doc.name == name) {
            return Some(entity(&doc.id, EntityKind::Doc));
        }
        if let Some(file) = folder.file_refs.iter().find(|file| file.name == name) {
            return Some(entity(&file.id, EntityKind::File));
        }
        folder
            .folders
            .iter()
            .find(|child| child.name == name)
            .map(|child| entity(&child.id, EntityKind::Folder))
    }
}

fn leaf(id: &str, name: &str) -> LeafNode {
    LeafNode {
        id: id.to_string(),
        name: name.to_string(),
    }
}

fn find_folder<'a>(folder: &'a FolderNode, id: &str) -> Option<&'a FolderNode> {
    if folder.id == id {
        return Some(folder);
    }
    folder.folders.iter().find_map(|child| find_folder(child, id))
}

fn find_folder_mut<'a>(folder: &'a mut FolderNode, id: &str) -> Option<&'a mut FolderNode> {
    if folder.id == id {
        return Some(folder);
    }
    folder
        .folders
        .iter_mut()
        .find_map(|child| find_folder_mut(child, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE_JSON: &str = r#"{
        "_id": "root",
        "name": "rootFolder",
        "docs": [{ "_id": "d1", "name": "main.tex" }],
        "fileRefs": [{ "_id": "f1", "name": "logo.png" }],
        "folders": [
            {
                "_id": "chapters",
                "name": "chapters",
                "docs": [{ "_id": "d2", "name": "intro.tex" }]
            }
        ]
    }"#;

    #[test]
    fn parses_editor_tree_json() {
        let tree = ProjectTree::from_json(TREE_JSON).unwrap();
        assert_eq!(tree.root_folder_id(), FolderId::new("root"));

        let doc = tree
            .find_by_name_in_folder(&FolderId::new("root"), "main.tex")
            .unwrap();
        assert_eq!(doc.id, "d1");
        assert_eq!(doc.kind, EntityKind::Doc);

        let file = tree
            .find_by_name_in_folder(&FolderId::new("root"), "logo.png")
            .unwrap();
        assert_eq!(file.kind, EntityKind::File);
    }

    #[test]
    fn finds_folders_and_nested_entries() {
        let tree = ProjectTree::from_json(TREE_JSON).unwrap();

        let folder = tree
            .find_by_name_in_folder(&FolderId::new("root"), "chapters")
            .unwrap();
        assert_eq!(folder.kind, EntityKind::Folder);
        assert_eq!(folder.id, "chapters");

        let nested = tree
            .find_by_name_in_folder(&FolderId::new("chapters"), "intro.tex")
            .unwrap();
        assert_eq!(nested.id, "d2");
        assert_eq!(nested.parent_folder_id, FolderId::new("chapters"));
    }

    #[test]
    fn lookup_is_scoped_to_one_folder() {
        let tree = ProjectTree::from_json(TREE_JSON).unwrap();
        assert!(
            tree.find_by_name_in_folder(&FolderId::new("root"), "intro.tex")
                .is_none()
        );
        assert!(
            tree.find_by_name_in_folder(&FolderId::new("missing"), "main.tex")
                .is_none()
        );
    }

    #[test]
    fn builder_adds_entries_under_parent() {
        let tree = ProjectTree::new("root")
            .with_folder("root", "fig", "figures")
            .with_file("fig", "f9", "plot.pdf");
        let plot = tree
            .find_by_name_in_folder(&FolderId::new("fig"), "plot.pdf")
            .unwrap();
        assert_eq!(plot.id, "f9");
    }
}
