use std::collections::BTreeMap;

use serde_json::json;

use super::*;

const ROUTE_JSON: &str = r#"
{
  "name": "billing",
  "match": [{ "uri": { "prefix": "/billing" } }],
  "route": [
    { "destination": { "host": "billing.payments.svc.cluster.local", "port": { "number": 8080 } }, "weight": 90 },
    { "destination": { "host": "billing-canary.payments.svc.cluster.local" }, "weight": 10 }
  ],
  "timeout": "5s",
  "retries": { "attempts": 3 }
}
"#;

#[test]
fn deserializes_istio_http_route() {
    let route: HttpRoute = serde_json::from_str(ROUTE_JSON).unwrap();

    assert_eq!(route.name, "billing");
    assert_eq!(
        route.matches[0].uri,
        Some(StringMatch::Prefix("/billing".into()))
    );
    assert_eq!(route.route.len(), 2);
    assert_eq!(route.route[0].weight, Some(90));
    assert_eq!(route.route[0].destination.port, Some(PortSelector { number: 8080 }));
    assert_eq!(route.extra["timeout"], json!("5s"));
    assert_eq!(route.extra["retries"], json!({ "attempts": 3 }));
}

#[test]
fn serialization_keeps_unmodelled_fields() {
    let route: HttpRoute = serde_json::from_str(ROUTE_JSON).unwrap();
    let value = serde_json::to_value(&route).unwrap();

    assert_eq!(value["match"][0]["uri"]["prefix"], "/billing");
    assert_eq!(value["timeout"], "5s");
    assert!(value["route"][1].get("port").is_none());
}

#[test]
fn equality_covers_unmodelled_fields() {
    let a: HttpRoute = serde_json::from_str(ROUTE_JSON).unwrap();
    let mut b = a.clone();
    assert_eq!(a, b);

    b.extra.insert("timeout".into(), json!("10s"));
    assert_ne!(a, b);
}

#[test]
fn builder_helpers_compose() {
    let route = HttpRoute::named("api")
        .with_prefix_match("/api")
        .with_destination("api.default.svc");

    assert_eq!(route.destination_hosts().collect::<Vec<_>>(), vec!["api.default.svc"]);
    assert_eq!(route.matches.len(), 1);
}

#[test]
fn virtual_service_with_missing_spec_fields() {
    let vs: VirtualService = serde_json::from_value(json!({
        "metadata": { "name": "empty", "namespace": "team-a" }
    }))
    .unwrap();

    assert_eq!(vs.key(), ObjectKey::new("team-a", "empty"));
    assert!(vs.rules().is_empty());
    assert!(vs.labels().is_empty());
}

#[test]
fn object_key_display() {
    assert_eq!(ObjectKey::new("infra", "mesh-routing").to_string(), "infra/mesh-routing");
}

#[test]
fn label_selector_matches_exact_value_only() {
    let selector = LabelSelector::new("network", "edge");

    let mut labels = BTreeMap::new();
    assert!(!selector.matches(&labels));

    labels.insert("network".to_string(), "mesh".to_string());
    assert!(!selector.matches(&labels));

    labels.insert("network".to_string(), "edge".to_string());
    assert!(selector.matches(&labels));
}

#[test]
fn label_selector_parses_key_value() {
    let selector: LabelSelector = "network = edge".parse().unwrap();
    assert_eq!(selector, LabelSelector::new("network", "edge"));
    assert_eq!(selector.to_string(), "network=edge");

    assert!("network".parse::<LabelSelector>().is_err());
    assert!("=edge".parse::<LabelSelector>().is_err());
}

#[test]
fn service_entry_primary_host() {
    let se = ServiceEntry::new("infra", "haproxy", vec!["a.internal".into(), "b.internal".into()]);
    assert_eq!(se.primary_host(), Some("a.internal"));

    let empty = ServiceEntry::new("infra", "haproxy", vec![]);
    assert_eq!(empty.primary_host(), None);
}
