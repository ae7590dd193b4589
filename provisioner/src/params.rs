// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The declarative request the orchestrator consumes.

use crate::Error;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Gcp,
    Azure,
}

impl Provider {
    /// Prefix of every generated resource name.
    pub fn name_prefix(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
            Provider::Azure => "az",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
            Provider::Azure => "azure",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Base,
    Dev,
    Nonprod,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Base => "base",
            Environment::Dev => "dev",
            Environment::Nonprod => "nonprod",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" => Ok(Environment::Base),
            "dev" => Ok(Environment::Dev),
            "nonprod" => Ok(Environment::Nonprod),
            "prod" => Ok(Environment::Prod),
            _ => Err(Error::invalid_input(format!(
                "unknown environment {s:?} (expected base, dev, nonprod or prod)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Web,
    App,
    Db,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Web => "web",
            Tier::App => "app",
            Tier::Db => "db",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" => Ok(Tier::Web),
            "app" => Ok(Tier::App),
            "db" => Ok(Tier::Db),
            _ => Err(Error::invalid_input(format!(
                "unknown tier {s:?} (expected web, app or db)"
            ))),
        }
    }
}

/// Requested operating system: a catalog name such as "redhat" plus the
/// release ("flavor") such as "8".
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OsSpec {
    pub name: String,
    pub version: String,
}

impl OsSpec {
    pub fn new(name: &str, version: &str) -> OsSpec {
        OsSpec {
            name: name.trim().to_ascii_lowercase(),
            version: version.trim().to_string(),
        }
    }
}

/// Inclusive range of instance indices, written `<start>-<end>`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CountRange {
    start: u32,
    end: u32,
}

impl CountRange {
    pub fn new(start: u32, end: u32) -> Result<CountRange, Error> {
        if start > end {
            return Err(Error::invalid_input(format!(
                "count range start {start} is greater than end {end}"
            )));
        }
        // Instance names carry the index as two digits.
        if end > 99 {
            return Err(Error::invalid_input(format!(
                "count range end {end} exceeds 99"
            )));
        }
        Ok(CountRange { start, end })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn indices(&self) -> RangeInclusive<u32> {
        self.start..=self.end
    }
}

impl fmt::Display for CountRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for CountRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || {
            Error::invalid_input(format!(
                "malformed count range {s:?} (expected \"<start>-<end>\")"
            ))
        };
        let (start, end) = s.trim().split_once('-').ok_or_else(malformed)?;
        let start = start.trim().parse::<u32>().map_err(|_| malformed())?;
        let end = end.trim().parse::<u32>().map_err(|_| malformed())?;
        CountRange::new(start, end)
    }
}

/// A validated-shape provisioning request. Provider specific fields travel
/// in `extras` untouched by the orchestrator.
#[derive(Clone, Debug)]
pub struct ProvisionRequest<E> {
    pub environment: Environment,
    pub tier: Tier,
    pub os: OsSpec,
    /// Comma separated data disk sizes, e.g. `"100GB, 200GB"`.
    pub disk_sizes: String,
    pub count: CountRange,
    pub app_code: String,
    pub change_number: String,
    pub extras: E,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_environment_parse_is_case_insensitive() {
        assert_eq!("nonProd".parse::<Environment>().unwrap(), Environment::Nonprod);
        assert_eq!(" PROD ".parse::<Environment>().unwrap(), Environment::Prod);
        assert!(matches!(
            "staging".parse::<Environment>(),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("Web".parse::<Tier>().unwrap(), Tier::Web);
        assert!("cache".parse::<Tier>().is_err());
    }

    #[test]
    fn test_count_range_parse() {
        let range: CountRange = "1-5".parse().unwrap();
        assert_eq!(range.len(), 5);
        assert_eq!(range.indices().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);

        let single: CountRange = " 3 - 3 ".parse().unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single.to_string(), "3-3");

        for bad in ["", "5", "a-b", "5-1", "1-", "-2", "1-100"] {
            assert!(
                matches!(
                    bad.parse::<CountRange>(),
                    Err(Error::InvalidInput { .. })
                ),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_os_spec_normalizes_name() {
        let os = OsSpec::new(" RedHat ", " 8 ");
        assert_eq!(os.name, "redhat");
        assert_eq!(os.version, "8");
    }
}
