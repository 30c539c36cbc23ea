//! Minimal research-archive (XNAT-compatible) HTTP client: session probe
//! and ZIP study import. The session/auth handshake beyond basic-auth is
//! owned by the archive deployment; this client only needs a credentialed
//! probe and the import endpoint.

pub mod error;

use std::io::Write;
use std::path::Path;

use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub use error::{Result, XnatError};

/// Per-upload metadata forwarded to the import service.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub project: Option<String>,
    pub subject: Option<String>,
    pub session: Option<String>,
    pub auto_archive: bool,
}

pub struct XnatClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl XnatClient {
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Cheap authenticated probe: a session token request that any
    /// XNAT-compatible archive answers.
    pub async fn probe(&self) -> Result<()> {
        let url = format!("{}/data/JSESSION", self.base_url);
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(XnatError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(())
    }

    /// Upload one study as a ZIP through the DICOM import service.
    pub async fn upload_study(&self, zip_bytes: Vec<u8>, opts: &UploadOptions) -> Result<()> {
        let mut url = format!(
            "{}/data/services/import?import-handler=DICOM-zip&inbody=true",
            self.base_url
        );
        if let Some(project) = &opts.project {
            url.push_str(&format!("&PROJECT_ID={project}"));
        }
        if let Some(subject) = &opts.subject {
            url.push_str(&format!("&SUBJECT_ID={subject}"));
        }
        if let Some(session) = &opts.session {
            url.push_str(&format!("&EXPT_LABEL={session}"));
        }
        if opts.auto_archive {
            url.push_str("&auto-archive=true");
        }

        debug!(bytes = zip_bytes.len(), url = %url, "Uploading study archive");
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .body(zip_bytes)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(XnatError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(())
    }
}

/// Package a study directory into an in-memory ZIP with stable entry
/// ordering.
pub fn zip_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut entries = Vec::new();
    collect_files(dir, dir, &mut entries)?;
    entries.sort();

    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for rel in &entries {
        let name = rel.to_string_lossy().replace('\\', "/");
        writer
            .start_file(name, options)
            .map_err(|e| XnatError::Zip(e.to_string()))?;
        let bytes = std::fs::read(dir.join(rel))?;
        writer.write_all(&bytes)?;
    }
    let cursor = writer.finish().map_err(|e| XnatError::Zip(e.to_string()))?;
    Ok(cursor.into_inner())
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<std::path::PathBuf>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn zip_directory_is_stable_and_complete() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("series1")).unwrap();
        std::fs::write(dir.path().join("series1/b.dcm"), b"bbbb").unwrap();
        std::fs::write(dir.path().join("series1/a.dcm"), b"aaaa").unwrap();
        std::fs::write(dir.path().join("z.dcm"), b"zzzz").unwrap();

        let first = zip_directory(dir.path()).unwrap();
        let second = zip_directory(dir.path()).unwrap();
        assert!(!first.is_empty());

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(first)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["series1/a.dcm", "series1/b.dcm", "z.dcm"]);

        let mut archive2 = zip::ZipArchive::new(std::io::Cursor::new(second)).unwrap();
        let names2: Vec<String> = (0..archive2.len())
            .map(|i| archive2.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, names2);
    }

    #[test]
    fn client_builds_with_trailing_slash() {
        let client = XnatClient::new(
            "https://xnat.example.org/",
            "svc",
            "secret",
            std::time::Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(client.base_url, "https://xnat.example.org");
    }
}
