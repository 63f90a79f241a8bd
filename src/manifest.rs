//! Installed-package manifest (`.nuspec`) parsing.
//!
//! Every installed application and every full package carries a small XML
//! manifest naming the package id, version and channel. Only the fields the
//! update flow reads are extracted; everything else is ignored.

use crate::error::{Result, UpdateError};
use quick_xml::Reader;
use quick_xml::events::Event;
use semver::Version;
use std::io::Read;
use std::path::Path;

/// Parsed package manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Unique package id.
    pub id: String,
    /// Installed/packaged version.
    pub version: Version,
    /// Display title (falls back to `id`).
    pub title: String,
    /// Package authors.
    pub authors: String,
    /// Free-form description.
    pub description: String,
    /// Main executable name inside the package.
    pub main_exe: String,
    /// Target OS the package was built for.
    pub os: String,
    /// Minimum OS version.
    pub os_min_version: String,
    /// Channel the package was released on (may be empty).
    pub channel: String,
    /// Release notes in markdown.
    pub release_notes: String,
    /// Release notes in HTML.
    pub release_notes_html: String,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            id: String::new(),
            version: Version::new(0, 0, 0),
            title: String::new(),
            authors: String::new(),
            description: String::new(),
            main_exe: String::new(),
            os: String::new(),
            os_min_version: String::new(),
            channel: String::new(),
            release_notes: String::new(),
            release_notes_html: String::new(),
        }
    }
}

impl Manifest {
    /// Parse a manifest from its XML text.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Parse`] on malformed XML, an invalid version, or
    /// when `id`/`version` are missing.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);

        let mut manifest = Self::default();
        let mut version_text = String::new();
        let mut stack: Vec<String> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .decode()
                        .map_err(|e| UpdateError::Parse(format!("manifest text: {e}")))?;
                    if let Some(field) = stack.last() {
                        manifest.append_field(field, &text, &mut version_text);
                    }
                }
                Ok(Event::GeneralRef(r)) => {
                    let name = r
                        .decode()
                        .map_err(|e| UpdateError::Parse(format!("manifest entity: {e}")))?;
                    let resolved = match name.as_ref() {
                        "amp" => "&",
                        "lt" => "<",
                        "gt" => ">",
                        "quot" => "\"",
                        "apos" => "'",
                        _ => "",
                    };
                    if let Some(field) = stack.last() {
                        manifest.append_field(field, resolved, &mut version_text);
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(UpdateError::Parse(format!(
                        "manifest XML error at byte {}: {e}",
                        reader.buffer_position()
                    )));
                }
            }
        }

        manifest.trim_fields();
        if manifest.id.is_empty() {
            return Err(UpdateError::Parse("manifest is missing <id>".to_owned()));
        }
        if version_text.trim().is_empty() {
            return Err(UpdateError::Parse("manifest is missing <version>".to_owned()));
        }
        manifest.version = Version::parse(version_text.trim())?;
        if manifest.title.is_empty() {
            manifest.title = manifest.id.clone();
        }
        Ok(manifest)
    }

    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::NotInstalled`] if the file is missing, or a
    /// parse error from [`Manifest::from_xml`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path).map_err(|e| {
            UpdateError::NotInstalled(format!("cannot read manifest {}: {e}", path.display()))
        })?;
        Self::from_xml(&xml)
    }

    /// Read the manifest embedded in a full package (zip archive with a
    /// single `*.nuspec` entry at its root).
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Parse`] if the archive is unreadable or carries
    /// no manifest.
    pub fn from_package(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| {
            UpdateError::Parse(format!("cannot open package {}: {e}", path.display()))
        })?;

        let entry_name = archive
            .file_names()
            .find(|n| !n.contains('/') && n.to_ascii_lowercase().ends_with(".nuspec"))
            .map(str::to_owned)
            .ok_or_else(|| {
                UpdateError::Parse(format!("package {} has no manifest", path.display()))
            })?;

        let mut entry = archive
            .by_name(&entry_name)
            .map_err(|e| UpdateError::Parse(format!("cannot read {entry_name}: {e}")))?;
        let mut xml = String::new();
        entry.read_to_string(&mut xml)?;
        Self::from_xml(&xml)
    }

    fn trim_fields(&mut self) {
        for field in [
            &mut self.id,
            &mut self.title,
            &mut self.authors,
            &mut self.description,
            &mut self.main_exe,
            &mut self.os,
            &mut self.os_min_version,
            &mut self.channel,
            &mut self.release_notes,
            &mut self.release_notes_html,
        ] {
            let trimmed = field.trim();
            if trimmed.len() != field.len() {
                *field = trimmed.to_owned();
            }
        }
    }

    fn append_field(&mut self, field: &str, text: &str, version: &mut String) {
        let target = match field {
            "id" => &mut self.id,
            "version" => version,
            "title" => &mut self.title,
            "authors" => &mut self.authors,
            "description" => &mut self.description,
            "mainExe" => &mut self.main_exe,
            "os" => &mut self.os,
            "osMinVersion" => &mut self.os_min_version,
            "channel" => &mut self.channel,
            "releaseNotes" => &mut self.release_notes,
            "releaseNotesHtml" => &mut self.release_notes_html,
            _ => return,
        };
        target.push_str(text);
    }
}
