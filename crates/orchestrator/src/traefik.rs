//! Traefik `IngressRoute` and `Middleware` objects as dynamic custom resources.

use std::sync::LazyLock;

use common::api::{CustomResource, Ingress, IngressConfig, IngressPath, IngressRule, PathType};
use regex::Regex;
use serde_json::{json, Value};

pub const API_VERSION: &str = "traefik.io/v1alpha1";
pub const INGRESS_ROUTE_KIND: &str = "IngressRoute";
pub const MIDDLEWARE_KIND: &str = "Middleware";
pub const DEFAULT_CERT_RESOLVER: &str = "letsencrypt";
const ENTRY_POINTS: [&str; 2] = ["web", "websecure"];

static HOST_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Host\(`([^`]+)`\)").expect("host rule pattern"));
static PATH_PREFIX_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"PathPrefix\(`([^`]+)`\)").expect("path prefix pattern"));

/// Name of the route object backing the ingress called `name`.
pub fn route_name(name: &str) -> String {
    if name.ends_with("-ingress") {
        name.to_string()
    } else {
        format!("{name}-ingress")
    }
}

pub fn strip_prefix_name(name: &str) -> String {
    format!("{name}-strip-prefix")
}

fn resource(kind: &str, name: String, namespace: &str, spec: Value) -> CustomResource {
    let mut resource = CustomResource::new(API_VERSION, kind, name);
    resource.metadata.namespace = Some(namespace.to_string());
    resource.spec = spec;
    resource
}

fn match_expression(config: &IngressConfig) -> String {
    let host = format!("Host(`{}`)", config.domain);
    match config.path_prefix.as_deref() {
        Some(prefix) if !prefix.is_empty() && prefix != "/" => {
            format!("{host} && PathPrefix(`{prefix}`)")
        }
        _ => host,
    }
}

fn wants_strip_prefix(config: &IngressConfig) -> bool {
    config.strip_prefix
        && config
            .path_prefix
            .as_deref()
            .is_some_and(|prefix| !prefix.is_empty() && prefix != "/")
}

/// `Middleware` removing the path prefix before traffic reaches the service,
/// when the config asks for it.
pub fn build_strip_prefix_middleware(
    config: &IngressConfig,
    namespace: &str,
) -> Option<CustomResource> {
    if !wants_strip_prefix(config) {
        return None;
    }
    let prefix = config.path_prefix.clone()?;
    Some(resource(
        MIDDLEWARE_KIND,
        strip_prefix_name(&config.name),
        namespace,
        json!({ "stripPrefix": { "prefixes": [prefix] } }),
    ))
}

pub fn build_ingress_route(config: &IngressConfig, namespace: &str) -> CustomResource {
    let mut middlewares: Vec<Value> = config
        .middlewares
        .iter()
        .map(|name| json!({ "name": name }))
        .collect();
    if wants_strip_prefix(config) {
        middlewares.push(json!({ "name": strip_prefix_name(&config.name) }));
    }

    let mut route = json!({
        "match": match_expression(config),
        "kind": "Rule",
        "services": [{ "name": config.service_name, "port": config.service_port }],
    });
    if !middlewares.is_empty() {
        route["middlewares"] = Value::Array(middlewares);
    }

    let mut spec = json!({
        "entryPoints": ENTRY_POINTS,
        "routes": [route],
    });
    if config.ssl {
        let resolver = config
            .cert_resolver
            .as_deref()
            .unwrap_or(DEFAULT_CERT_RESOLVER);
        spec["tls"] = json!({ "certResolver": resolver });
    }

    resource(INGRESS_ROUTE_KIND, route_name(&config.name), namespace, spec)
}

/// Every host named by `Host(`…`)` clauses in a route match.
pub fn hosts_from_match(expression: &str) -> Vec<String> {
    HOST_RULE
        .captures_iter(expression)
        .map(|caps| caps[1].to_string())
        .collect()
}

fn path_from_match(expression: &str) -> String {
    PATH_PREFIX_RULE
        .captures(expression)
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| "/".to_string())
}

/// Normalizes a stored `IngressRoute` back into an [`Ingress`].
pub fn ingress_from_route(name: &str, route: &CustomResource) -> Ingress {
    let routes = route
        .spec
        .get("routes")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut hosts = Vec::new();
    let mut rules = Vec::new();
    for entry in &routes {
        let expression = entry.get("match").and_then(Value::as_str).unwrap_or_default();
        let service = entry
            .get("services")
            .and_then(Value::as_array)
            .and_then(|services| services.first());
        let service_name = service
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string();
        let service_port = service
            .and_then(|s| s.get("port"))
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(80);
        let path = path_from_match(expression);

        for host in hosts_from_match(expression) {
            if !hosts.contains(&host) {
                hosts.push(host.clone());
            }
            rules.push(IngressRule {
                host,
                paths: vec![IngressPath {
                    path: path.clone(),
                    path_type: PathType::Prefix,
                    service_name: service_name.clone(),
                    service_port,
                }],
            });
        }
    }

    Ingress {
        name: route.metadata.name.clone(),
        namespace: route.metadata.namespace.clone(),
        hosts,
        tls: route.spec.get("tls").is_some(),
        rules,
    }
}
