/// One remote subtree to mirror, with the rsync filter rules applied to it.
///
/// Rules are passed to rsync in order, e.g. `["+ */", "+ *.nc", "- *"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SyncFolder {
    /// Absolute remote directory, e.g. `/pub/data`.
    pub source: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub filters: Vec<String>,
}

impl SyncFolder {
    pub fn new(source: impl Into<String>, filters: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            source: source.into(),
            filters: filters.into_iter().map(Into::into).collect(),
        }
    }

    /// The source without trailing slashes; the remote root is `""`.
    pub fn root(&self) -> &str {
        self.source.trim_end_matches('/')
    }

    /// Absolute remote path of an entry relative to this folder.
    pub fn join(&self, relative: &str) -> String {
        format!("{}/{}", self.root(), relative.trim_start_matches('/'))
    }
}
