//! Certificate inspection.

use std::io::Write;
use std::path::Path;

use magma_pki::Certificate;

use super::read_text;
use crate::error::Result;
use crate::output::{CertificateDetail, OutputFormat};

/// Handler for the inspect command.
pub struct InspectCommand<'a> {
    path: &'a Path,
}

impl<'a> InspectCommand<'a> {
    /// Creates a new inspect command handler.
    #[must_use]
    pub const fn new(path: &'a Path) -> Self {
        Self { path }
    }

    /// Prints the certificate's details.
    pub fn execute<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<()> {
        let certificate = Certificate::from_pem(&read_text(self.path)?)?;
        format.write(out, &CertificateDetail::from(&certificate))
    }
}
