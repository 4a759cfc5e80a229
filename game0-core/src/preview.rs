use std::fmt;
use std::path::{Path, PathBuf};

use crate::document::ExtractedGame;
use crate::error::CoreResult;

/// Capabilities granted to the preview frame. Anything not listed here
/// (top navigation, storage access, downloads) stays denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxPermission {
    AllowScripts,
    AllowSameOrigin,
    AllowForms,
    AllowPopups,
    AllowPresentation,
}

impl SandboxPermission {
    pub const ALL: [SandboxPermission; 5] = [
        SandboxPermission::AllowScripts,
        SandboxPermission::AllowSameOrigin,
        SandboxPermission::AllowForms,
        SandboxPermission::AllowPopups,
        SandboxPermission::AllowPresentation,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Self::AllowScripts => "allow-scripts",
            Self::AllowSameOrigin => "allow-same-origin",
            Self::AllowForms => "allow-forms",
            Self::AllowPopups => "allow-popups",
            Self::AllowPresentation => "allow-presentation",
        }
    }
}

impl fmt::Display for SandboxPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Space-separated value for the iframe `sandbox` attribute.
pub fn sandbox_attribute(permissions: &[SandboxPermission]) -> String {
    permissions
        .iter()
        .map(|p| p.token())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Paths written by [`SandboxedPreview::write_to`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewFiles {
    pub game: PathBuf,
    pub host: PathBuf,
}

/// Holds at most one game document and renders it into an isolated frame.
/// Each `replace` swaps the whole document; there are no partial updates.
#[derive(Debug, Clone)]
pub struct SandboxedPreview {
    game: Option<ExtractedGame>,
    permissions: Vec<SandboxPermission>,
    title: String,
}

impl Default for SandboxedPreview {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxedPreview {
    pub fn new() -> Self {
        Self {
            game: None,
            permissions: SandboxPermission::ALL.to_vec(),
            title: "Preview".into(),
        }
    }

    pub fn with_permissions(mut self, permissions: &[SandboxPermission]) -> Self {
        self.permissions = permissions.to_vec();
        self
    }

    /// Returns the document it replaced, if any.
    pub fn replace(&mut self, game: ExtractedGame) -> Option<ExtractedGame> {
        self.game.replace(game)
    }

    pub fn clear(&mut self) {
        self.game = None;
    }

    pub fn document(&self) -> Option<&ExtractedGame> {
        self.game.as_ref()
    }

    pub fn data_uri(&self) -> Option<String> {
        self.game.as_ref().map(|g| {
            format!("data:text/html;charset=utf-8,{}", urlencoding::encode(g.html()))
        })
    }

    pub fn iframe_html(&self) -> Option<String> {
        let src = self.data_uri()?;
        Some(format!(
            r#"<iframe src="{src}" title="{title}" sandbox="{sandbox}" style="width: 100%; height: 100%; border: 0;"></iframe>"#,
            title = self.title,
            sandbox = sandbox_attribute(&self.permissions),
        ))
    }

    /// Minimal standalone page that embeds the frame full-size.
    pub fn host_page(&self) -> Option<String> {
        let frame = self.iframe_html()?;
        Some(format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>html, body {{ margin: 0; height: 100%; background: #111; }}</style>\n</head>\n<body>\n{frame}\n</body>\n</html>\n",
            title = self.title,
        ))
    }

    /// Write `game.html` and `preview.html` into `dir`, creating it if needed.
    pub async fn write_to(&self, dir: &Path) -> CoreResult<Option<PreviewFiles>> {
        let (Some(game), Some(host)) = (self.game.as_ref(), self.host_page()) else {
            return Ok(None);
        };
        tokio::fs::create_dir_all(dir).await?;
        let files = PreviewFiles {
            game: dir.join("game.html"),
            host: dir.join("preview.html"),
        };
        tokio::fs::write(&files.game, game.html()).await?;
        tokio::fs::write(&files.host, host).await?;
        tracing::info!(game = %files.game.display(), host = %files.host.display(), "preview written");
        Ok(Some(files))
    }
}
