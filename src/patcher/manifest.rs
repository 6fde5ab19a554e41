//! Content-hashed manifest of the served files.
//!
//! Regenerated wholesale after every successful switch or update, never
//! diffed. The format is fixed by the distribution clients: an indented XML
//! document, `FileProfiler` root with a `FormatVersion` attribute, one
//! `File` element per served file carrying name, size, and MD5 digest.

use std::path::Path;

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use walkdir::WalkDir;

pub const MANIFEST_NAME: &str = "index.xml";
pub const FORMAT_VERSION: &str = "1";

/// Extensions never distributed as content.
pub const EXCLUDED_EXTENSIONS: &[&str] = &["xml", "php"];

/// Directory names skipped wherever they appear on the traversed path.
pub const EXCLUDED_DIRS: &[&str] = &[".git"];

/// Index/bookkeeping files that must not show up in their own listing.
pub const EXCLUDED_FILES: &[&str] = &["index.xml", "index.html", ".gitkeep"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path relative to the served root.
    pub path: String,
    pub size: u64,
    /// Hex MD5 of the whole file.
    pub digest: String,
}

/// Walk the served root and collect every distributable file, in path order.
pub fn scan(root: &Path) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();

    for item in WalkDir::new(root).sort_by_file_name() {
        let item = item.context("walking served files")?;
        if !item.file_type().is_file() {
            continue;
        }

        let rel = item
            .path()
            .strip_prefix(root)
            .context("entry outside served root")?;

        // Exclusion matches the traversed directory part as a substring,
        // not an exact segment.
        let dir = rel
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        if EXCLUDED_DIRS.iter().any(|name| dir.contains(name)) {
            continue;
        }

        let file_name = item.file_name().to_string_lossy();
        if EXCLUDED_FILES.iter().any(|name| *name == file_name) {
            continue;
        }

        let ext = rel
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        if EXCLUDED_EXTENSIONS.iter().any(|e| *e == ext) {
            continue;
        }

        let meta = item.metadata().context("reading file metadata")?;
        let bytes = std::fs::read(item.path())
            .with_context(|| format!("reading {}", item.path().display()))?;

        entries.push(ManifestEntry {
            path: rel.to_string_lossy().into_owned(),
            size: meta.len(),
            digest: hex::encode(Md5::digest(&bytes)),
        });
    }

    Ok(entries)
}

/// Regenerate the manifest in place, fully replacing the previous one.
pub fn write_manifest(root: &Path) -> Result<()> {
    let entries = scan(root)?;
    let document = render(&entries);
    std::fs::write(root.join(MANIFEST_NAME), document)
        .with_context(|| format!("writing {}", root.join(MANIFEST_NAME).display()))
}

fn render(entries: &[ManifestEntry]) -> String {
    let mut doc = String::from("<?xml version=\"1.0\" ?>\n");
    doc.push_str(&format!(
        "<FileProfiler FormatVersion=\"{FORMAT_VERSION}\">\n"
    ));
    doc.push_str("  <File_List>\n");
    for entry in entries {
        doc.push_str(&format!(
            "    <File FileName=\"{}\" FileSize=\"{}\" FileMD5=\"{}\"/>\n",
            escape_attr(&entry.path),
            entry.size,
            entry.digest,
        ));
    }
    doc.push_str("  </File_List>\n");
    doc.push_str("</FileProfiler>\n");
    doc
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn exclusions_leave_only_distributable_content() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        fs::write(temp.path().join("a.txt"), "hello")?;
        fs::write(temp.path().join("b.xml"), "<data/>")?;
        fs::create_dir(temp.path().join(".git"))?;
        fs::write(temp.path().join(".git/config"), "[core]")?;
        fs::write(temp.path().join("index.html"), "<html/>")?;

        let entries = scan(temp.path())?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "a.txt");
        assert_eq!(entries[0].size, 5);
        // md5("hello")
        assert_eq!(entries[0].digest, "5d41402abc4b2a76b9719d911017c592");

        Ok(())
    }

    #[test]
    fn nested_files_keep_relative_paths() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        fs::create_dir_all(temp.path().join("packs/maps"))?;
        fs::write(temp.path().join("packs/maps/town.dat"), "map bytes")?;

        let entries = scan(temp.path())?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "packs/maps/town.dat");

        Ok(())
    }

    #[test]
    fn excluded_dir_matches_as_substring_of_the_path() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        fs::create_dir_all(temp.path().join("tools/.git-hooks"))?;
        fs::write(temp.path().join("tools/.git-hooks/pre-commit"), "#!/bin/sh")?;

        assert!(scan(temp.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn manifest_is_rewritten_in_place() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        fs::write(temp.path().join("client.dat"), "payload")?;

        write_manifest(temp.path())?;
        let first = fs::read_to_string(temp.path().join(MANIFEST_NAME))?;
        assert!(first.contains("FileProfiler FormatVersion=\"1\""));
        assert!(first.contains("FileName=\"client.dat\""));
        assert!(first.contains("FileSize=\"7\""));

        // Its own index never lists itself.
        write_manifest(temp.path())?;
        let second = fs::read_to_string(temp.path().join(MANIFEST_NAME))?;
        assert!(!second.contains(&format!("FileName=\"{MANIFEST_NAME}\"")));

        Ok(())
    }
}
