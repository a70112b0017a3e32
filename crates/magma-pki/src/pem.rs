//! PEM armor helpers.

use base64::Engine;

use crate::error::{Error, Result};

pub(crate) const CERTIFICATE: &str = "CERTIFICATE";
pub(crate) const CERTIFICATE_REQUEST: &str = "CERTIFICATE REQUEST";
pub(crate) const RSA_PRIVATE_KEY: &str = "RSA PRIVATE KEY";
pub(crate) const PRIVATE_KEY: &str = "PRIVATE KEY";
pub(crate) const ENCRYPTED_PRIVATE_KEY: &str = "ENCRYPTED PRIVATE KEY";

/// A decoded PEM block.
#[derive(Debug)]
pub(crate) struct Block {
    pub label: String,
    pub contents: Vec<u8>,
}

/// Wraps DER bytes in PEM armor with 64-column base64 lines.
pub(crate) fn encode(label: &str, der: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        b64.as_bytes()
            .chunks(64)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

/// Decodes the first PEM block found in `input`.
pub(crate) fn decode(input: &str) -> Result<Block> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(input.as_bytes())
        .map_err(|e| Error::Parse(format!("invalid PEM: {e}")))?;
    Ok(Block {
        label: pem.label,
        contents: pem.contents,
    })
}

/// Decodes a PEM block and checks its label.
pub(crate) fn decode_expecting(input: &str, label: &str) -> Result<Vec<u8>> {
    let block = decode(input)?;
    if block.label != label {
        return Err(Error::Parse(format!(
            "expected PEM label '{label}', found '{}'",
            block.label
        )));
    }
    Ok(block.contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_wraps_lines_at_64_columns() {
        let pem = encode(CERTIFICATE, &[0xAB; 100]);
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.ends_with("-----END CERTIFICATE-----\n"));
        for line in pem.lines() {
            assert!(line.len() <= 64 || line.starts_with("-----"));
        }
    }

    #[test]
    fn decode_returns_label_and_contents() {
        let pem = encode(PRIVATE_KEY, &[1, 2, 3, 4, 5]);
        let block = decode(&pem).unwrap();
        assert_eq!(block.label, PRIVATE_KEY);
        assert_eq!(block.contents, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn decode_rejects_garbage() {
        let result = decode("not a pem block");
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn decode_expecting_rejects_wrong_label() {
        let pem = encode(CERTIFICATE_REQUEST, &[9, 9, 9]);
        let result = decode_expecting(&pem, CERTIFICATE);
        assert!(matches!(result, Err(Error::Parse(msg)) if msg.contains("CERTIFICATE REQUEST")));
    }
}
