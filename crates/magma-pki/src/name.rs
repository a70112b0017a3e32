//! Subject names and DNS alternative names.

use once_cell::sync::Lazy;
use rcgen::{DistinguishedName, DnType, DnValue, Ia5String, PrintableString, SanType};
use regex::Regex;

use crate::error::{Error, Result};

/// Upper bound for a common name (RFC 5280 `ub-common-name`).
pub const MAX_COMMON_NAME_LEN: usize = 64;

static DNS_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\*\.)?([A-Za-z0-9_]([A-Za-z0-9_-]{0,61}[A-Za-z0-9_])?\.)*[A-Za-z0-9_]([A-Za-z0-9_-]{0,61}[A-Za-z0-9_])?$")
        .unwrap_or_else(|_| unreachable!("static DNS name pattern"))
});

/// Checks that a common name is non-empty and within the X.520 bound.
pub(crate) fn validate_common_name(common_name: &str) -> Result<()> {
    if common_name.trim().is_empty() {
        return Err(Error::InvalidParameter("subject cannot be empty".into()));
    }
    if common_name.chars().count() > MAX_COMMON_NAME_LEN {
        return Err(Error::InvalidParameter(format!(
            "subject '{common_name}' exceeds {MAX_COMMON_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Checks that a country is a two-letter code.
pub(crate) fn validate_country(country: &str) -> Result<()> {
    if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(Error::InvalidParameter(format!(
            "country '{country}' must be a two-letter code"
        )));
    }
    Ok(())
}

/// Checks that every alternative name is a syntactically valid DNS name.
pub(crate) fn validate_dns_names(names: &[String]) -> Result<()> {
    for name in names {
        if name.len() > 253 || !DNS_NAME.is_match(name) {
            return Err(Error::San(format!("invalid DNS name '{name}'")));
        }
    }
    Ok(())
}

/// Builds a `C=<country>, CN=<common_name>` distinguished name.
pub(crate) fn distinguished_name(
    common_name: &str,
    country: Option<&str>,
) -> Result<DistinguishedName> {
    validate_common_name(common_name)?;

    let mut dn = DistinguishedName::new();
    if let Some(country) = country {
        validate_country(country)?;
        let printable = PrintableString::try_from(country.to_string())
            .map_err(|e| Error::InvalidParameter(format!("country '{country}': {e}")))?;
        dn.push(DnType::CountryName, DnValue::PrintableString(printable));
    }
    dn.push(DnType::CommonName, common_name);
    Ok(dn)
}

/// Converts DNS names into rcgen SAN entries.
pub(crate) fn dns_sans(names: &[String]) -> Result<Vec<SanType>> {
    validate_dns_names(names)?;
    names
        .iter()
        .map(|dns| {
            let ia5 = Ia5String::try_from(dns.clone())
                .map_err(|e| Error::San(format!("invalid DNS name '{dns}': {e}")))?;
            Ok(SanType::DnsName(ia5))
        })
        .collect()
}
