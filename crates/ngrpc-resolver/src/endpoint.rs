//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Endpoint records and key layout
//!
//! Records use the JSON shape of etcd's naming endpoints manager
//! (`{"Addr": ..., "Metadata": ...}`) so resolvers written against that
//! layout can read what this crate registers.

use crate::error::ResolverResult;
use crate::registry::ServiceInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key holding the service name
pub const METADATA_NAME: &str = "name";

/// Metadata key holding the comma-joined tags
pub const METADATA_TAGS: &str = "tags";

/// Value stored under a registration key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    /// Reachable address (`host:port`)
    #[serde(rename = "Addr")]
    pub addr: String,

    /// Free-form string metadata
    #[serde(rename = "Metadata", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl EndpointRecord {
    /// Build the record published for a service instance
    pub fn for_service(info: &ServiceInfo) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_NAME.to_string(), info.name.clone());
        metadata.insert(METADATA_TAGS.to_string(), info.tags.join(","));
        Self {
            addr: info.address.clone(),
            metadata,
        }
    }

    /// Service name from metadata
    pub fn name(&self) -> Option<&str> {
        self.metadata.get(METADATA_NAME).map(String::as_str)
    }

    /// Tags from metadata, split on commas
    pub fn tags(&self) -> Vec<String> {
        self.metadata
            .get(METADATA_TAGS)
            .map(|tags| {
                tags.split(',')
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn to_bytes(&self) -> ResolverResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> ResolverResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Join key components with `/`.
///
/// Empty components are skipped, slashes between components collapse to one
/// and a leading slash on the first component is kept.
pub fn join_key(parts: &[&str]) -> String {
    let mut key = String::new();
    for (index, part) in parts.iter().enumerate() {
        let trimmed = if index == 0 {
            part.trim_end_matches('/')
        } else {
            part.trim_matches('/')
        };
        if trimmed.is_empty() {
            if index == 0 && part.starts_with('/') {
                key.push('/');
            }
            continue;
        }
        if !key.is_empty() && !key.ends_with('/') {
            key.push('/');
        }
        key.push_str(trimmed);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_key() {
        assert_eq!(
            join_key(&["svc", "orders", "10.0.0.5:5000"]),
            "svc/orders/10.0.0.5:5000"
        );
        assert_eq!(join_key(&["svc/", "/orders/"]), "svc/orders");
        assert_eq!(join_key(&["/svc", "orders"]), "/svc/orders");
        assert_eq!(join_key(&["", "orders", "a:1"]), "orders/a:1");
        assert_eq!(join_key(&["/", "orders"]), "/orders");
    }

    #[test]
    fn test_record_layout_matches_naming_manager() {
        let info = ServiceInfo::new("orders", "10.0.0.5:5000");
        let record = EndpointRecord::for_service(&info);
        let json = String::from_utf8(record.to_bytes().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"Addr":"10.0.0.5:5000","Metadata":{"name":"orders","tags":"grpc"}}"#
        );
    }

    #[test]
    fn test_record_without_metadata_decodes() {
        let record = EndpointRecord::from_bytes(br#"{"Addr":"127.0.0.1:9000"}"#).unwrap();
        assert_eq!(record.addr, "127.0.0.1:9000");
        assert!(record.name().is_none());
        assert!(record.tags().is_empty());
    }

    #[test]
    fn test_tags_are_split() {
        let info = ServiceInfo::new("orders", "a:1")
            .with_tags(vec!["grpc".to_string(), "v2".to_string()]);
        let record = EndpointRecord::for_service(&info);
        assert_eq!(record.tags(), vec!["grpc", "v2"]);
        assert_eq!(record.name(), Some("orders"));
    }
}
