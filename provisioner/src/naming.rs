// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Standardized resource names.
//!
//! A base name is `<provider prefix><cell code><app code>`, where the four
//! character cell code encodes role, platform and environment and comes from
//! a fixed per-provider table. Instance `i` of a request is named
//! `<base name><i:02>`.

use crate::params::OsSpec;
use crate::Environment;
use crate::Error;
use crate::Provider;
use std::fmt;

/// Normalized operating system family used by the naming tables.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OsFamily {
    Windows,
    Linux,
}

const LINUX_OS_NAMES: &[&str] =
    &["redhat", "centos", "suse", "debian", "ubuntu", "amazon"];

/// The Linux distributions Azure names cover.
const AZURE_LINUX_OS_NAMES: &[&str] = &["redhat", "suse"];

impl OsFamily {
    /// Maps a catalog OS name onto its family, or `None` if the name is not
    /// one the gateway knows.
    pub fn from_os_name(name: &str) -> Option<OsFamily> {
        let name = name.trim().to_ascii_lowercase();
        if name == "windows" {
            Some(OsFamily::Windows)
        } else if LINUX_OS_NAMES.contains(&name.as_str()) {
            Some(OsFamily::Linux)
        } else {
            None
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Windows => f.write_str("windows"),
            OsFamily::Linux => f.write_str("linux"),
        }
    }
}

fn cell_code(
    provider: Provider,
    environment: Environment,
    family: OsFamily,
) -> Option<&'static str> {
    use Environment::*;
    use OsFamily::*;

    match provider {
        Provider::Aws | Provider::Gcp => match (environment, family) {
            (Base, Windows) => Some("bwed"),
            (Base, Linux) => Some("bxwd"),
            (Prod, Windows) => Some("pwep"),
            (Prod, Linux) => Some("pxep"),
            (Dev, Windows) => Some("swed"),
            (Dev, Linux) => Some("sxed"),
            (Nonprod, _) => None,
        },
        Provider::Azure => match (environment, family) {
            (Base, Windows) => Some("bwwd"),
            (Base, Linux) => Some("bxwd"),
            (Prod, Windows) => Some("pwwp"),
            (Prod, Linux) => Some("pxwp"),
            (Nonprod, Windows) => Some("swwd"),
            (Nonprod, Linux) => Some("sxwd"),
            (Dev, _) => None,
        },
    }
}

/// Resolves the base name for a request.
///
/// Any pair missing from the provider's table is an
/// [`Error::UnsupportedCombination`]; there is no default name. Azure only
/// names RHEL and SUSE hosts among the Linux family, and any other
/// distribution is an [`Error::UnsupportedOs`].
pub fn resolve(
    provider: Provider,
    environment: Environment,
    os: &OsSpec,
    app_code: &str,
) -> Result<String, Error> {
    let os_name = os.name.as_str();
    let app_code = app_code.trim();
    if app_code.is_empty() || !app_code.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(Error::invalid_input(format!(
            "application code {app_code:?} must be non-empty and alphanumeric"
        )));
    }

    let family = OsFamily::from_os_name(os_name).ok_or_else(|| {
        Error::UnsupportedCombination {
            message: format!(
                "no naming template for operating system {os_name:?}"
            ),
        }
    })?;
    if provider == Provider::Azure
        && family == OsFamily::Linux
        && !AZURE_LINUX_OS_NAMES.contains(&os_name)
    {
        return Err(Error::UnsupportedOs {
            os: os_name.to_string(),
            version: os.version.clone(),
        });
    }
    let code = cell_code(provider, environment, family).ok_or_else(|| {
        Error::UnsupportedCombination {
            message: format!(
                "no {provider} naming template for {family} hosts in \
                 environment {environment}"
            ),
        }
    })?;

    Ok(format!("{}{}{}", provider.name_prefix(), code, app_code))
}

/// Name of instance `index` under `base`.
pub fn instance_name(base: &str, index: u32) -> String {
    format!("{base}{index:02}")
}
