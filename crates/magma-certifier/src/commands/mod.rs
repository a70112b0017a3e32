//! Command implementations.
//!
//! Each subcommand has a handler that writes its result to an output stream
//! in the selected format.

mod bundle;
mod inspect;
mod pki;

pub use bundle::{BundleCommand, RenewCommand};
pub use inspect::InspectCommand;
pub use pki::{CaCommand, CsrCommand, KeyCommand, PfxCommand, SignCommand};

use std::io::Write;
use std::path::Path;

use magma_pki::PrivateKey;

use crate::bundle::write_path;
use crate::cli::KeyInput;
use crate::error::{CertifierError, Result};
use crate::output::{OutputFormat, WrittenFile};

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| CertifierError::io(path, e))
}

fn read_key(input: &KeyInput) -> Result<PrivateKey> {
    Ok(PrivateKey::from_pem(read_text(&input.key)?)?)
}

/// Writes PEM text to `dest`, or to `out` when no destination was given.
fn emit<W: Write>(
    out: &mut W,
    format: &OutputFormat,
    kind: &str,
    contents: &[u8],
    dest: Option<&Path>,
    secret: bool,
) -> Result<()> {
    match dest {
        Some(path) => {
            write_path(path, contents, secret)?;
            format.write(
                out,
                &WrittenFile {
                    kind: kind.to_string(),
                    path: path.to_path_buf(),
                    bytes: contents.len(),
                },
            )
        }
        None => out
            .write_all(contents)
            .map_err(|e| CertifierError::io("<stdout>", e)),
    }
}
