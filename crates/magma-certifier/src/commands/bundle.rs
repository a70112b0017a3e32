//! Bundle generation and renewal commands.

use std::io::Write;

use tracing::info;

use magma_relation::CertificateKind;

use crate::bundle::CertificateBundle;
use crate::cli::{BundleArgs, KindArg};
use crate::error::Result;
use crate::output::{BundleSummary, OutputFormat};

/// Handler for the bundle command.
pub struct BundleCommand<'a> {
    args: &'a BundleArgs,
}

impl<'a> BundleCommand<'a> {
    /// Creates a new bundle command handler.
    #[must_use]
    pub const fn new(args: &'a BundleArgs) -> Self {
        Self { args }
    }

    /// Loads the bundle from the certificates directory, generating it first
    /// if the directory holds none.
    pub fn execute<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<()> {
        let config = self.args.resolve()?;
        let existed = CertificateBundle::exists(&config.certs_dir);
        let bundle = CertificateBundle::load_or_generate(&config)?;
        let action = if existed { "loaded" } else { "generated" };
        info!(dir = %config.certs_dir.display(), action, "Bundle ready");

        let summary = BundleSummary::new(action, &config.certs_dir, bundle.certificates());
        format.write(out, &summary)
    }
}

/// Handler for the renew command.
pub struct RenewCommand<'a> {
    args: &'a BundleArgs,
    kind: CertificateKind,
}

impl<'a> RenewCommand<'a> {
    /// Creates a new renew command handler.
    #[must_use]
    pub fn new(args: &'a BundleArgs, kind: KindArg) -> Self {
        Self {
            args,
            kind: kind.into(),
        }
    }

    /// Renews the material in place and rewrites the bundle.
    pub fn execute<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<()> {
        let config = self.args.resolve()?;
        let mut bundle = CertificateBundle::load(&config.certs_dir)?;
        bundle.renew(self.kind, &config)?;
        bundle.save(&config.certs_dir)?;

        let summary = BundleSummary::new(
            format!("renewed {}", self.kind),
            &config.certs_dir,
            bundle.certificates(),
        );
        format.write(out, &summary)
    }
}
