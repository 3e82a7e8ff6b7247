/// Hand-off to whatever turns a document into on-screen components.
///
/// The session only ever pushes one immutable document plus its snapshot id;
/// nothing is read back.
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::document::Document;
use crate::versions::SnapshotId;

pub trait Renderer: Send {
    fn render(&mut self, id: SnapshotId, document: &Document) -> Result<()>;
}

/// Prints the document as pretty JSON.
pub struct StdoutRenderer<W: Write + Send> {
    out: W,
}

impl StdoutRenderer<std::io::Stdout> {
    pub fn new() -> Self {
        Self::with_writer(std::io::stdout())
    }
}

impl<W: Write + Send> StdoutRenderer<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> Renderer for StdoutRenderer<W> {
    fn render(&mut self, id: SnapshotId, document: &Document) -> Result<()> {
        writeln!(self.out, "  ◆ snapshot {id}  ·  {} fragments", document.len())?;
        writeln!(self.out, "{}", document.to_pretty_json())?;
        self.out.flush()?;
        Ok(())
    }
}

/// Rewrites a file with the active document so an external renderer can
/// watch it. Writes to a sibling temp file first, then renames.
pub struct FileRenderer {
    path: PathBuf,
}

impl FileRenderer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Sibling of the target with `.tmp` appended, so it never equals the target.
    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(OsString::from).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Renderer for FileRenderer {
    fn render(&mut self, id: SnapshotId, document: &Document) -> Result<()> {
        let staging = self.staging_path();
        std::fs::write(&staging, document.to_pretty_json())
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        std::fs::rename(&staging, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        log::info!("rendered snapshot {id} to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Document {
        Document::from_fragments(vec![json!({"beginRendering": {"surfaceId": "s"}})]).unwrap()
    }

    #[test]
    fn test_stdout_renderer_writes_header_and_json() {
        let mut buf = Vec::new();
        StdoutRenderer::with_writer(&mut buf).render(SnapshotId::new(3), &doc()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("  ◆ snapshot 3  ·  1 fragments\n"));
        assert!(text.contains("\"beginRendering\""));
    }

    #[test]
    fn test_file_renderer_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ui.json");
        std::fs::write(&path, "old").unwrap();

        FileRenderer::new(path.clone()).render(SnapshotId::new(1), &doc()).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, json!([{"beginRendering": {"surfaceId": "s"}}]));
        assert!(!dir.path().join("ui.json.tmp").exists());
    }

    #[test]
    fn test_file_renderer_target_with_tmp_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.tmp");

        let mut renderer = FileRenderer::new(path.clone());
        assert_eq!(renderer.staging_path(), dir.path().join("live.tmp.tmp"));
        renderer.render(SnapshotId::new(2), &doc()).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, json!([{"beginRendering": {"surfaceId": "s"}}]));
        assert!(!dir.path().join("live.tmp.tmp").exists());
    }
}
