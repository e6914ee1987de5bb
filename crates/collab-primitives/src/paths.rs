//! Deterministic path resolution for the four substrate subtrees (C1).

use thiserror::Error;

/// One of the four top-level subtrees the engine reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PathKind {
    Documents,
    Rooms,
    Snapshots,
    Signaling,
}

impl PathKind {
    const fn sub_name(self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Rooms => "rooms",
            Self::Snapshots => "snapshots",
            Self::Signaling => "signaling",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PathError {
    #[error("path layout is missing required config for `{0}`")]
    MissingConfig(&'static str),
}

/// Where the four subtrees live relative to the substrate root.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum PathLayout {
    /// Four absolute paths supplied verbatim.
    Flat {
        documents: Option<String>,
        rooms: Option<String>,
        snapshots: Option<String>,
        signaling: Option<String>,
    },
    /// A `basePath` joined with the document id, then the four sub-names appended.
    Nested { base_path: Option<String> },
}

impl Default for PathLayout {
    fn default() -> Self {
        Self::Flat {
            documents: Some("documents".to_owned()),
            rooms: Some("rooms".to_owned()),
            snapshots: Some("snapshots".to_owned()),
            signaling: Some("signaling".to_owned()),
        }
    }
}

impl PathLayout {
    /// Resolves the absolute path for `kind` given `doc_id`.
    ///
    /// `doc_id` is unused by the flat layout (each flat path is already a
    /// full, document-scoped path supplied by the embedder) and joined in by
    /// the nested layout.
    pub fn resolve(&self, kind: PathKind, doc_id: &str) -> Result<String, PathError> {
        match self {
            Self::Flat {
                documents,
                rooms,
                snapshots,
                signaling,
            } => {
                let configured = match kind {
                    PathKind::Documents => documents,
                    PathKind::Rooms => rooms,
                    PathKind::Snapshots => snapshots,
                    PathKind::Signaling => signaling,
                };
                configured
                    .clone()
                    .ok_or(PathError::MissingConfig(kind.sub_name()))
            }
            Self::Nested { base_path } => {
                let base = base_path
                    .as_deref()
                    .ok_or(PathError::MissingConfig("basePath"))?;
                Ok(format!("{base}/{doc_id}/{}", kind.sub_name()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_layout_ignores_doc_id() {
        let layout = PathLayout::default();
        assert_eq!(
            layout.resolve(PathKind::Snapshots, "doc-1").unwrap(),
            "snapshots"
        );
    }

    #[test]
    fn nested_layout_joins_base_and_doc_id() {
        let layout = PathLayout::Nested {
            base_path: Some("workspaces/acme".to_owned()),
        };
        assert_eq!(
            layout.resolve(PathKind::Signaling, "doc-1").unwrap(),
            "workspaces/acme/doc-1/signaling"
        );
    }

    #[test]
    fn missing_nested_base_path_fails_clearly() {
        let layout = PathLayout::Nested { base_path: None };
        let err = layout.resolve(PathKind::Rooms, "doc-1").unwrap_err();
        assert!(matches!(err, PathError::MissingConfig("basePath")));
    }

    #[test]
    fn missing_flat_sub_config_fails_clearly() {
        let layout = PathLayout::Flat {
            documents: None,
            rooms: Some("rooms".to_owned()),
            snapshots: Some("snapshots".to_owned()),
            signaling: Some("signaling".to_owned()),
        };
        let err = layout.resolve(PathKind::Documents, "doc-1").unwrap_err();
        assert!(matches!(err, PathError::MissingConfig("documents")));
    }
}
