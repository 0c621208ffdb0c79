//! Extra scripts and stylesheets injected before a chart is built.

use serde::{Deserialize, Serialize};

/// How a manifest entry is injected into the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A script or stylesheet path on the local filesystem.
    File,
    InlineCss,
    InlineJs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub kind: ResourceKind,
    pub locator: String,
}

/// `files` may arrive as a comma separated string or as an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileList {
    Joined(String),
    List(Vec<String>),
}

impl FileList {
    fn paths(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            FileList::Joined(joined) => joined.split(',').collect(),
            FileList::List(items) => items.iter().map(String::as_str).collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<FileList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js: Option<String>,
}

impl ResourceManifest {
    /// Interpret a `resources` request value: a JSON manifest, else a bare file list.
    pub fn from_request_value(raw: &str) -> Self {
        match serde_json::from_str::<ResourceManifest>(raw.trim()) {
            Ok(manifest) => manifest,
            Err(_) => Self {
                files: Some(FileList::Joined(raw.to_string())),
                ..Default::default()
            },
        }
    }

    /// Overlay `other` on top of `self`; keys present in `other` win.
    pub fn extend(mut self, other: ResourceManifest) -> Self {
        if other.files.is_some() {
            self.files = other.files;
        }
        if other.css.is_some() {
            self.css = other.css;
        }
        if other.js.is_some() {
            self.js = other.js;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Entries in injection order: files, then inline CSS, then inline JS.
    pub fn entries(&self) -> Vec<ResourceEntry> {
        let mut entries: Vec<ResourceEntry> = self
            .files
            .as_ref()
            .map(FileList::paths)
            .unwrap_or_default()
            .into_iter()
            .map(|locator| ResourceEntry {
                kind: ResourceKind::File,
                locator,
            })
            .collect();

        if let Some(css) = self.css.as_deref().filter(|css| !css.trim().is_empty()) {
            entries.push(ResourceEntry {
                kind: ResourceKind::InlineCss,
                locator: css.to_string(),
            });
        }
        if let Some(js) = self.js.as_deref().filter(|js| !js.trim().is_empty()) {
            entries.push(ResourceEntry {
                kind: ResourceKind::InlineJs,
                locator: js.to_string(),
            });
        }
        entries
    }
}
