// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image Resolver building blocks: mapping an OS onto a catalog filter and
//! picking the newest unencumbered image from what the catalog returns.

use crate::error::ResourceKind;
use crate::Error;
use crate::OsSpec;
use crate::Provider;
use chrono::DateTime;
use chrono::Utc;
use std::cmp::Ordering;
use std::fmt;

/// Provider specific catalog query for an OS.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CatalogFilter {
    /// EC2 image name, with `*` wildcards.
    NamePattern { pattern: String },
    /// Compute Engine image family within a public image project.
    Family { project: &'static str, family: &'static str },
    /// Azure marketplace publisher/offer/SKU.
    Sku { publisher: &'static str, offer: &'static str, sku: String },
}

impl fmt::Display for CatalogFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogFilter::NamePattern { pattern } => {
                write!(f, "name {pattern:?}")
            }
            CatalogFilter::Family { project, family } => {
                write!(f, "family {project}/{family}")
            }
            CatalogFilter::Sku { publisher, offer, sku } => {
                write!(f, "{publisher}:{offer}:{sku}")
            }
        }
    }
}

/// (version token, family) pairs for each Compute Engine image project.
/// The first family whose token appears in the requested version wins.
const GCP_FAMILIES: &[(&str, &str, &[(&str, &str)])] = &[
    (
        "windows",
        "windows-cloud",
        &[
            ("12", "windows-2012-r2"),
            ("16", "windows-2016"),
            ("19", "windows-2019"),
        ],
    ),
    (
        "centos",
        "centos-cloud",
        &[("6", "centos-6"), ("7", "centos-7"), ("8", "centos-8")],
    ),
    (
        "redhat",
        "rhel-cloud",
        &[("6", "rhel-6"), ("7", "rhel-7"), ("8", "rhel-8")],
    ),
    (
        "debian",
        "ml-images",
        &[("13", "tf-1-13"), ("14", "tf-1-14"), ("15", "tf-1-15")],
    ),
    (
        "ubuntu",
        "ubuntu-os-cloud",
        &[
            ("18", "ubuntu-1804-lts"),
            ("19", "ubuntu-1910"),
            ("20", "ubuntu-2004-lts"),
        ],
    ),
    ("suse", "suse-cloud", &[("12", "sles-12"), ("15", "sles-15")]),
];

impl CatalogFilter {
    /// Phase one of image resolution. Makes no remote call, so an unknown OS
    /// fails before anything touches the provider.
    pub fn for_os(
        provider: Provider,
        os: &OsSpec,
    ) -> Result<CatalogFilter, Error> {
        let name = os.name.trim().to_ascii_lowercase();
        let version = os.version.trim().to_ascii_lowercase();
        let unsupported = || Error::UnsupportedOs {
            os: os.name.clone(),
            version: os.version.clone(),
        };
        if version.is_empty() {
            return Err(unsupported());
        }

        match provider {
            Provider::Aws => {
                let pattern = match name.as_str() {
                    "windows" => format!(
                        "Windows_Server-{version}-English-Full-Base-*"
                    ),
                    "redhat" => format!("RHEL-{version}_HVM-*"),
                    "suse" => format!("suse-sles-{version}"),
                    "amazon" => format!("amzn{version}-ami-hvm-*"),
                    _ => return Err(unsupported()),
                };
                Ok(CatalogFilter::NamePattern { pattern })
            }
            Provider::Gcp => GCP_FAMILIES
                .iter()
                .find(|(os_name, _, _)| *os_name == name)
                .and_then(|(_, project, families)| {
                    families
                        .iter()
                        .find(|(token, _)| version.contains(token))
                        .map(|(_, family)| CatalogFilter::Family {
                            project: *project,
                            family: *family,
                        })
                })
                .ok_or_else(unsupported),
            Provider::Azure => {
                let (publisher, offer) = match name.as_str() {
                    "windows" => ("MicrosoftWindowsServer", "WindowsServer"),
                    "redhat" => ("RedHat", "RHEL"),
                    "suse" => ("SUSE", "SLES"),
                    _ => return Err(unsupported()),
                };
                Ok(CatalogFilter::Sku {
                    publisher,
                    offer,
                    sku: os.version.trim().to_string(),
                })
            }
        }
    }
}

/// One image returned by a catalog query.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImageCandidate {
    /// AMI id, image self link, or image version resource id.
    pub reference: String,
    /// Catalog version, where the provider versions images separately from
    /// the OS release.
    pub version: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Marketplace product codes; billed images carry at least one.
    pub product_codes: Vec<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedImage {
    pub reference: String,
    pub version: Option<String>,
}

/// Phase two of image resolution: drop product-coded candidates and return
/// the newest remaining one.
///
/// Candidates are ordered by creation time first and catalog version second;
/// a candidate without a timestamp sorts before any candidate with one.
pub fn select_latest(
    candidates: Vec<ImageCandidate>,
    filter: &CatalogFilter,
) -> Result<ResolvedImage, Error> {
    candidates
        .into_iter()
        .filter(|c| c.product_codes.is_empty())
        .max_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| {
                compare_versions(
                    a.version.as_deref().unwrap_or(""),
                    b.version.as_deref().unwrap_or(""),
                )
            })
        })
        .map(|c| ResolvedImage { reference: c.reference, version: c.version })
        .ok_or_else(|| {
            Error::not_found(
                ResourceKind::Image,
                format!("no unencumbered image matches {filter}"),
            )
        })
}

#[derive(Debug, Eq, Ord, PartialEq, PartialOrd)]
enum VersionSegment<'a> {
    Text(&'a str),
    Number(u64),
}

/// Compares dotted versions segment by segment, numerically where both
/// segments are numbers.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn segments(v: &str) -> Vec<VersionSegment<'_>> {
        v.split('.')
            .map(|s| match s.parse::<u64>() {
                Ok(n) => VersionSegment::Number(n),
                Err(_) => VersionSegment::Text(s),
            })
            .collect()
    }
    segments(a).cmp(&segments(b))
}
