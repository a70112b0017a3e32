//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use magma_pki::{Certificate, is_expired};

use crate::cli::Format;
use crate::error::{CertifierError, Result};

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<()>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CertifierError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer).map_err(stdout_error)?;
            }
            Format::Table => value.write_table(writer).map_err(stdout_error)?,
        }
        Ok(())
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

fn stdout_error(e: std::io::Error) -> CertifierError {
    CertifierError::io("<stdout>", e)
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()>;
}

/// Details of one certificate.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateDetail {
    /// Common name, if the subject has one.
    pub common_name: Option<String>,
    /// RFC 4514 subject.
    pub subject: String,
    /// RFC 4514 issuer.
    pub issuer: String,
    /// Serial number (hex).
    pub serial: String,
    /// Start of validity.
    pub not_before: DateTime<Utc>,
    /// End of validity.
    pub not_after: DateTime<Utc>,
    /// Whether `not_after` has passed.
    pub expired: bool,
    /// CA flag.
    pub is_ca: bool,
    /// DNS alternative names.
    pub san: Vec<String>,
    /// Subject key identifier (hex).
    pub subject_key_id: Option<String>,
    /// Authority key identifier (hex).
    pub authority_key_id: Option<String>,
}

impl From<&Certificate> for CertificateDetail {
    fn from(certificate: &Certificate) -> Self {
        let info = certificate.info();
        Self {
            common_name: certificate.common_name().map(String::from),
            subject: info.subject,
            issuer: info.issuer,
            serial: info.serial,
            not_before: info.not_before,
            not_after: info.not_after,
            expired: is_expired(certificate),
            is_ca: info.is_ca,
            san: info.san,
            subject_key_id: certificate.subject_key_id().map(hex),
            authority_key_id: certificate.authority_key_id().map(hex),
        }
    }
}

impl TableDisplay for CertificateDetail {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "Certificate: {}", self.common_name.as_deref().unwrap_or("-"))?;
        writeln!(writer, "══════════════════════════════════════════════════")?;
        writeln!(writer, "Subject:        {}", self.subject)?;
        writeln!(writer, "Issuer:         {}", self.issuer)?;
        writeln!(writer, "Serial:         {}", self.serial)?;
        writeln!(writer, "Not Before:     {}", self.not_before.to_rfc3339())?;
        writeln!(
            writer,
            "Not After:      {}{}",
            self.not_after.to_rfc3339(),
            if self.expired { " (expired)" } else { "" }
        )?;
        writeln!(writer, "CA:             {}", if self.is_ca { "yes" } else { "no" })?;
        if !self.san.is_empty() {
            writeln!(writer, "Alt Names:      {}", self.san.join(", "))?;
        }
        if let Some(ski) = &self.subject_key_id {
            writeln!(writer, "Subject Key ID: {ski}")?;
        }
        if let Some(aki) = &self.authority_key_id {
            writeln!(writer, "Authority Key:  {aki}")?;
        }
        Ok(())
    }
}

/// One certificate file in a bundle.
#[derive(Debug, Clone, Serialize)]
pub struct BundleEntry {
    /// File name inside the certificates directory.
    pub file: String,
    /// Common name.
    pub common_name: String,
    /// Issuer common name.
    pub issuer: String,
    /// End of validity.
    pub not_after: DateTime<Utc>,
}

/// Result of a bundle or renew command.
#[derive(Debug, Clone, Serialize)]
pub struct BundleSummary {
    /// What happened to the bundle.
    pub action: String,
    /// Certificates directory.
    pub certs_dir: PathBuf,
    /// Certificate files in the bundle.
    pub certificates: Vec<BundleEntry>,
}

impl BundleSummary {
    /// Summarises `certificates` stored in `certs_dir`.
    pub fn new<'a>(
        action: impl Into<String>,
        certs_dir: impl Into<PathBuf>,
        certificates: impl IntoIterator<Item = (&'a str, &'a Certificate)>,
    ) -> Self {
        let certificates = certificates
            .into_iter()
            .map(|(file, certificate)| BundleEntry {
                file: file.to_string(),
                common_name: certificate.common_name().unwrap_or_default().to_string(),
                issuer: issuer_common_name(certificate.issuer()),
                not_after: certificate.not_after(),
            })
            .collect();
        Self {
            action: action.into(),
            certs_dir: certs_dir.into(),
            certificates,
        }
    }
}

impl TableDisplay for BundleSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "Bundle {} in {}", self.action, self.certs_dir.display())?;
        writeln!(writer)?;
        writeln!(
            writer,
            "{:<20}  {:<28}  {:<24}  {:<20}",
            "FILE", "COMMON NAME", "ISSUER", "NOT AFTER"
        )?;
        writeln!(writer, "{}", "─".repeat(98))?;
        for entry in &self.certificates {
            writeln!(
                writer,
                "{:<20}  {:<28}  {:<24}  {:<20}",
                entry.file,
                truncate(&entry.common_name, 28),
                truncate(&entry.issuer, 24),
                entry.not_after.format("%Y-%m-%d %H:%M:%S")
            )?;
        }
        Ok(())
    }
}

/// A file written by a command.
#[derive(Debug, Clone, Serialize)]
pub struct WrittenFile {
    /// What was written.
    pub kind: String,
    /// Destination.
    pub path: PathBuf,
    /// Size in bytes.
    pub bytes: usize,
}

impl TableDisplay for WrittenFile {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "Wrote {} to {} ({} bytes)", self.kind, self.path.display(), self.bytes)
    }
}

/// Extracts `CN=` from an RFC 4514 name, falling back to the whole name.
fn issuer_common_name(name: &str) -> String {
    name.split(',')
        .find_map(|rdn| rdn.strip_prefix("CN="))
        .unwrap_or(name)
        .to_string()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":")
}

/// Truncate a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    } else {
        s.chars().take(max_len).collect()
    }
}
