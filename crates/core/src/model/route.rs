//! HTTP routing rule types.
//!
//! These mirror the `http` entries of an Istio `VirtualService`. Fields the
//! controller never inspects are preserved verbatim in `extra` maps so that
//! equality always covers the whole rule, not just the modelled subset.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One HTTP routing rule: a name, match conditions and weighted destinations.
///
/// Rules carry no identity field. Two rules are the same rule iff every
/// field (including the verbatim `extra` fields) is equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpMatchRequest>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<HttpRouteDestination>,

    /// rewrite, retries, timeout, headers, etc.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HttpRoute {
    /// Create an empty rule with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a URI prefix match condition.
    pub fn with_prefix_match(mut self, prefix: impl Into<String>) -> Self {
        self.matches.push(HttpMatchRequest {
            uri: Some(StringMatch::Prefix(prefix.into())),
            ..HttpMatchRequest::default()
        });
        self
    }

    /// Add an unweighted destination pointing at `host`.
    pub fn with_destination(mut self, host: impl Into<String>) -> Self {
        self.route.push(HttpRouteDestination::to_host(host));
        self
    }

    /// Hosts of every destination, in route order.
    pub fn destination_hosts(&self) -> impl Iterator<Item = &str> {
        self.route.iter().map(|r| r.destination.host.as_str())
    }
}

/// Match conditions for a rule. All set conditions must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpMatchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<StringMatch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<StringMatch>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, StringMatch>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A string matcher; serialized as `{"prefix": "/api"}` and friends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

/// A weighted destination of a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteDestination {
    pub destination: Destination,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HttpRouteDestination {
    /// A destination that sends all traffic to `host`.
    pub fn to_host(host: impl Into<String>) -> Self {
        Self {
            destination: Destination {
                host: host.into(),
                ..Destination::default()
            },
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSelector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSelector {
    pub number: u32,
}
