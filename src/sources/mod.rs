//! File Acquirer
//!
//! Produces [`SourceDescriptor`]s from one of four origins:
//!
//! - **Upload**: files already in memory, passed through unchanged
//! - **Folder**: a local directory scanned for `.csv`, `.xlsx` and `.xpt` files
//! - **URL list**: one URL per line, each fetched over HTTP(S)
//! - **Fixed remote**: a configured repository and file list
//!
//! Failures never abort a batch. Each one becomes a [`Notice`] and the file is
//! simply missing from [`Acquisition::descriptors`].

pub mod folder;
pub mod remote;

pub use folder::scan_folder;
pub use remote::{fetch_fixed_remote, fetch_url_list};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::Notice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OriginKind {
    Upload,
    Folder,
    UrlList,
    FixedRemote,
}

impl OriginKind {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "upload" => Some(OriginKind::Upload),
            "folder" => Some(OriginKind::Folder),
            "urls" | "url-list" => Some(OriginKind::UrlList),
            "remote" | "fixed-remote" => Some(OriginKind::FixedRemote),
            _ => None,
        }
    }
}

/// A named, not-yet-parsed input file
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub origin: OriginKind,
    pub file_name: String,
    pub content: Bytes,
}

impl SourceDescriptor {
    pub fn new(origin: OriginKind, file_name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            origin,
            file_name: file_name.into(),
            content: content.into(),
        }
    }

    /// File name with its extension removed; this becomes the table name
    pub fn base_name(&self) -> &str {
        base_name(&self.file_name)
    }
}

/// Strip the final extension, keeping dotfiles intact
pub fn base_name(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(idx) => &file_name[..idx],
    }
}

/// An uploaded file as received from the browser
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content: Bytes,
}

/// Outcome of one acquisition call: whatever succeeded plus what to tell the user
#[derive(Debug, Default)]
pub struct Acquisition {
    pub descriptors: Vec<SourceDescriptor>,
    pub notices: Vec<Notice>,
}

impl Acquisition {
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

pub fn from_uploads(files: Vec<UploadedFile>) -> Acquisition {
    let mut acquisition = Acquisition {
        descriptors: files
            .into_iter()
            .map(|f| SourceDescriptor::new(OriginKind::Upload, f.file_name, f.content))
            .collect(),
        notices: Vec::new(),
    };
    if acquisition.is_empty() {
        acquisition.notices.push(Notice::warning("No files were uploaded."));
    }
    acquisition
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("AE.csv"), "AE");
        assert_eq!(base_name("lab.results.xpt"), "lab.results");
        assert_eq!(base_name("noext"), "noext");
        assert_eq!(base_name(".hidden"), ".hidden");
    }

    #[test]
    fn test_uploads_pass_through_unchanged() {
        let acquisition = from_uploads(vec![UploadedFile {
            file_name: "sample.csv".to_string(),
            content: Bytes::from_static(b"id,name\n1,a\n"),
        }]);
        assert_eq!(acquisition.descriptors.len(), 1);
        let descriptor = &acquisition.descriptors[0];
        assert_eq!(descriptor.origin, OriginKind::Upload);
        assert_eq!(descriptor.file_name, "sample.csv");
        assert_eq!(&descriptor.content[..], b"id,name\n1,a\n");
        assert!(acquisition.notices.is_empty());
    }

    #[test]
    fn test_no_uploads_warns() {
        let acquisition = from_uploads(Vec::new());
        assert!(acquisition.is_empty());
        assert_eq!(acquisition.notices, vec![Notice::warning("No files were uploaded.")]);
    }

    #[test]
    fn test_origin_ids() {
        assert_eq!(OriginKind::from_id("urls"), Some(OriginKind::UrlList));
        assert_eq!(OriginKind::from_id("remote"), Some(OriginKind::FixedRemote));
        assert_eq!(OriginKind::from_id("ftp"), None);
    }
}
