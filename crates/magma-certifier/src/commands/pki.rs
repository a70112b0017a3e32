//! Single-artifact PKI commands: key, csr, ca, sign and pfx.

use std::io::Write;

use tracing::info;

use magma_pki::{
    CaOptions, Certificate, CertificateSigningRequest, CsrRequest, KeyParams, LeafOptions,
    generate_ca, generate_certificate, generate_csr, generate_pfx_package, generate_private_key,
};

use super::{emit, read_key, read_text};
use crate::cli::{CaArgs, CsrArgs, KeyArgs, PfxArgs, SignArgs};
use crate::error::Result;
use crate::output::OutputFormat;

/// Handler for the key command.
pub struct KeyCommand<'a> {
    args: &'a KeyArgs,
}

impl<'a> KeyCommand<'a> {
    /// Creates a new key command handler.
    #[must_use]
    pub const fn new(args: &'a KeyArgs) -> Self {
        Self { args }
    }

    /// Generates the key.
    pub fn execute<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<()> {
        let mut params = KeyParams::new()
            .key_size(self.args.size)
            .public_exponent(self.args.exponent);
        if let Some(password) = &self.args.password {
            params = params.password(password);
        }
        let key = generate_private_key(&params)?;
        emit(out, format, "private key", key.as_bytes(), self.args.out.as_deref(), true)
    }
}

/// Handler for the csr command.
pub struct CsrCommand<'a> {
    args: &'a CsrArgs,
}

impl<'a> CsrCommand<'a> {
    /// Creates a new csr command handler.
    #[must_use]
    pub const fn new(args: &'a CsrArgs) -> Self {
        Self { args }
    }

    /// Builds and signs the request.
    pub fn execute<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<()> {
        let key = read_key(&self.args.key)?;
        let mut request = CsrRequest::new(&self.args.subject).alt_names(&self.args.alt_names);
        if let Some(country) = &self.args.country {
            request = request.country(country);
        }
        let password = self.args.key.key_password.as_deref().map(str::as_bytes);
        let csr = generate_csr(&key, password, &request)?;
        emit(out, format, "certificate signing request", csr.pem().as_bytes(), self.args.out.as_deref(), false)
    }
}

/// Handler for the ca command.
pub struct CaCommand<'a> {
    args: &'a CaArgs,
}

impl<'a> CaCommand<'a> {
    /// Creates a new ca command handler.
    #[must_use]
    pub const fn new(args: &'a CaArgs) -> Self {
        Self { args }
    }

    /// Self-signs the CA certificate.
    pub fn execute<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<()> {
        let key = read_key(&self.args.key)?;
        let options = CaOptions::default()
            .validity_days(self.args.days)
            .country(Some(&self.args.country));
        let password = self.args.key.key_password.as_deref().map(str::as_bytes);
        let certificate = generate_ca(&key, password, &self.args.subject, &options)?;
        emit(out, format, "CA certificate", certificate.pem().as_bytes(), self.args.out.as_deref(), false)
    }
}

/// Handler for the sign command.
pub struct SignCommand<'a> {
    args: &'a SignArgs,
}

impl<'a> SignCommand<'a> {
    /// Creates a new sign command handler.
    #[must_use]
    pub const fn new(args: &'a SignArgs) -> Self {
        Self { args }
    }

    /// Issues a certificate for the CSR.
    pub fn execute<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<()> {
        let csr = CertificateSigningRequest::from_pem(&read_text(&self.args.csr)?)?;
        let ca_certificate = Certificate::from_pem(&read_text(&self.args.ca_cert)?)?;
        let ca_key = magma_pki::PrivateKey::from_pem(read_text(&self.args.ca_key)?)?;

        let mut options = LeafOptions::default().validity_days(self.args.days);
        if !self.args.alt_names.is_empty() {
            options = options.alt_names(&self.args.alt_names);
        }
        let password = self.args.ca_key_password.as_deref().map(str::as_bytes);
        let certificate = generate_certificate(&csr, &ca_certificate, &ca_key, password, &options)?;
        info!(subject = %certificate.subject(), serial = %certificate.serial(), "Signed certificate");
        emit(out, format, "certificate", certificate.pem().as_bytes(), self.args.out.as_deref(), false)
    }
}

/// Handler for the pfx command.
pub struct PfxCommand<'a> {
    args: &'a PfxArgs,
}

impl<'a> PfxCommand<'a> {
    /// Creates a new pfx command handler.
    #[must_use]
    pub const fn new(args: &'a PfxArgs) -> Self {
        Self { args }
    }

    /// Packages the certificate and key.
    pub fn execute<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<()> {
        let certificate = Certificate::from_pem(&read_text(&self.args.cert)?)?;
        let key = read_key(&self.args.key)?;
        let key_password = self.args.key.key_password.as_deref().map(str::as_bytes);
        let package = generate_pfx_package(&certificate, &key, key_password, &self.args.password)?;
        emit(out, format, "PFX package", package.as_bytes(), Some(&self.args.out), true)
    }
}
