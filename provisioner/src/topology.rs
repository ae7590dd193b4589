// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topology Resolver building blocks.
//!
//! Providers enumerate candidates remotely and hand them to the selection
//! functions here, which never talk to the network. Matching is first match
//! in enumeration order within a kind of match.
//!
//! Substring matching is ambiguous when names overlap ("web" matches inside
//! "webhook"). It is only used for candidates that carry no structured tag
//! for the attribute being matched.

use crate::error::ResourceKind;
use crate::Error;
use std::collections::BTreeMap;
use std::fmt;

/// Tag key holding a resource's display name.
pub const NAME_TAG: &str = "Name";

/// How a new instance's traffic is policed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SecurityBoundary {
    /// An explicit security group attached to the instance.
    Group(String),
    /// Policy inherited from the named network or subnet, e.g. network-wide
    /// firewall rules or a subnet-level security group.
    Inherited(String),
}

impl fmt::Display for SecurityBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityBoundary::Group(id) => write!(f, "group {id}"),
            SecurityBoundary::Inherited(from) => {
                write!(f, "inherited from {from}")
            }
        }
    }
}

/// Where new instances attach. Resolved once per request and shared
/// read-only by every fan-out worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Topology {
    pub network: String,
    pub subnet: String,
    pub security: SecurityBoundary,
}

/// A remote resource as seen by the resolver: an identifier plus its tags.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TaggedResource {
    pub id: String,
    /// Identifier of the enclosing network, when the resource lives in one.
    pub network_id: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl TaggedResource {
    pub fn new(id: impl Into<String>) -> TaggedResource {
        TaggedResource { id: id.into(), ..Default::default() }
    }

    pub fn in_network(mut self, network_id: impl Into<String>) -> Self {
        self.network_id = Some(network_id.into());
        self
    }

    pub fn with_tag(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.tags.get(NAME_TAG).map(String::as_str)
    }
}

/// What a tagged lookup is looking for.
#[derive(Clone, Copy, Debug)]
pub struct TagQuery<'a> {
    /// Structured tag key, e.g. `env`.
    pub key: &'a str,
    /// Value the structured tag must equal (ASCII case-insensitively).
    pub value: &'a str,
    /// Token the `Name` tag must contain, for candidates without `key`.
    pub name_token: &'a str,
}

impl fmt::Display for TagQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tag {}={:?} or name containing {:?}",
            self.key, self.value, self.name_token
        )
    }
}

/// Picks a candidate by structured tag, falling back to a case-sensitive
/// substring match on the `Name` tag of untagged candidates.
///
/// An exact tag match anywhere in the list beats a substring match earlier
/// in the list. A candidate that carries `query.key` with a different value
/// never matches, whatever its name says.
pub fn select_tagged<'a>(
    candidates: &'a [TaggedResource],
    query: TagQuery<'_>,
) -> Option<&'a TaggedResource> {
    let exact = candidates.iter().find(|c| {
        c.tags
            .get(query.key)
            .is_some_and(|v| v.eq_ignore_ascii_case(query.value))
    });
    exact.or_else(|| {
        candidates.iter().find(|c| {
            !c.tags.contains_key(query.key)
                && c.name().is_some_and(|name| name.contains(query.name_token))
        })
    })
}

/// Picks the first name containing `token` (case-sensitive), for providers
/// whose resources carry no structured tags.
pub fn select_by_name<'a, T, F>(
    candidates: &'a [T],
    token: &str,
    name_of: F,
) -> Option<&'a T>
where
    F: Fn(&T) -> &str,
{
    candidates.iter().find(|c| name_of(c).contains(token))
}

/// Turns an empty selection into [`Error::ResourceNotFound`].
pub fn require<T>(
    found: Option<T>,
    kind: ResourceKind,
    lookup: impl FnOnce() -> String,
) -> Result<T, Error> {
    found.ok_or_else(|| Error::not_found(kind, lookup()))
}

#[cfg(test)]
mod test {
    use super::*;

    fn subnet(id: &str, tags: &[(&str, &str)]) -> TaggedResource {
        tags.iter()
            .fold(TaggedResource::new(id), |r, (k, v)| r.with_tag(*k, *v))
    }

    fn db_query() -> TagQuery<'static> {
        TagQuery { key: "tier", value: "db", name_token: "db" }
    }

    #[test]
    fn test_single_substring_match() {
        let candidates = vec![
            subnet("subnet-1", &[("Name", "prod-web-a")]),
            subnet("subnet-2", &[("Name", "prod-db-a")]),
            subnet("subnet-3", &[("Name", "prod-app-a")]),
        ];
        let found = select_tagged(&candidates, db_query()).unwrap();
        assert_eq!(found.id, "subnet-2");
    }

    #[test]
    fn test_single_tagged_match() {
        let candidates = vec![
            subnet("subnet-1", &[("tier", "web"), ("Name", "prod-web")]),
            subnet("subnet-2", &[("tier", "db"), ("Name", "prod-data")]),
            subnet("subnet-3", &[("tier", "app"), ("Name", "prod-app")]),
        ];
        let found = select_tagged(&candidates, db_query()).unwrap();
        assert_eq!(found.id, "subnet-2");
    }

    #[test]
    fn test_no_match_is_not_found() {
        let candidates = vec![
            subnet("subnet-1", &[("Name", "prod-web-a")]),
            subnet("subnet-3", &[("Name", "prod-app-a")]),
        ];
        let result = require(
            select_tagged(&candidates, db_query()),
            ResourceKind::Subnet,
            || db_query().to_string(),
        );
        assert!(matches!(
            result,
            Err(Error::ResourceNotFound { kind: ResourceKind::Subnet, .. })
        ));
    }

    #[test]
    fn test_exact_tag_beats_earlier_substring() {
        let candidates = vec![
            subnet("subnet-1", &[("Name", "legacy-db")]),
            subnet("subnet-2", &[("Name", "data"), ("tier", "DB")]),
        ];
        let found = select_tagged(&candidates, db_query()).unwrap();
        assert_eq!(found.id, "subnet-2");
    }

    #[test]
    fn test_tagged_mismatch_never_falls_back() {
        // Tagged as web even though the name mentions db.
        let candidates =
            vec![subnet("subnet-1", &[("Name", "db-proxy"), ("tier", "web")])];
        assert!(select_tagged(&candidates, db_query()).is_none());
    }

    #[test]
    fn test_substring_is_case_sensitive_and_ordered() {
        let query = TagQuery { key: "env", value: "nonprod", name_token: "nonProd" };
        let candidates = vec![
            subnet("vpc-1", &[("Name", "NONPROD")]),
            subnet("vpc-2", &[("Name", "nonProd-east")]),
            subnet("vpc-3", &[("Name", "nonProd-west")]),
        ];
        assert_eq!(select_tagged(&candidates, query).unwrap().id, "vpc-2");
    }

    #[test]
    fn test_select_by_name() {
        let names = vec!["shared-base-vpc", "core-p-vpc", "dev-vpc"];
        assert_eq!(
            select_by_name(&names, "-p-vpc", |n| *n).copied(),
            Some("core-p-vpc")
        );
        assert_eq!(select_by_name(&names, "qa", |n| *n), None);
    }
}
