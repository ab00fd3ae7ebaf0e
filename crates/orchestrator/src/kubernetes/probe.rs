//! Optional-feature probing against the API server.

use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::Client;
use tracing::{debug, warn};

use crate::traefik;

/// Object name no real workload uses; a 404 naming it proves the route exists.
pub(crate) const PROBE_NAME: &str = "dokploy-capability-probe";

pub(crate) fn hpa_resource() -> ApiResource {
    ApiResource::erase::<HorizontalPodAutoscaler>(&())
}

pub(crate) fn network_policy_resource() -> ApiResource {
    ApiResource::erase::<NetworkPolicy>(&())
}

pub(crate) fn pod_metrics_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics"),
        "pods",
    )
}

/// Resource descriptor for a namespaced custom kind; the plural is the
/// lowercase kind with an `s`.
pub(crate) fn custom_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = common::api::split_api_version(api_version);
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(group, version, kind),
        &format!("{}s", kind.to_lowercase()),
    )
}

pub(crate) fn ingress_route_resource() -> ApiResource {
    custom_resource(traefik::API_VERSION, traefik::INGRESS_ROUTE_KIND)
}

fn is_probe_miss(err: &kube::Error) -> bool {
    matches!(
        err,
        kube::Error::Api(response)
            if response.code == 404
                && response.reason == "NotFound"
                && response.message.contains(PROBE_NAME)
    )
}

/// True when `resource` is served: fetching the probe object either succeeds
/// or fails with a 404 about that object. Any other failure means absent.
pub(crate) async fn probe(client: &Client, namespace: &str, resource: &ApiResource) -> bool {
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, resource);
    match api.get(PROBE_NAME).await {
        Ok(_) => true,
        Err(err) if is_probe_miss(&err) => true,
        Err(err) => {
            debug!(kind = %resource.kind, error = %err, "capability probe failed");
            false
        }
    }
}

/// metrics-server answers pod metric listings.
pub(crate) async fn metrics_server(client: &Client, namespace: &str) -> bool {
    let api: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &pod_metrics_resource());
    match api.list(&ListParams::default().limit(1)).await {
        Ok(_) => true,
        Err(err) => {
            debug!(error = %err, "metrics.k8s.io is not served");
            false
        }
    }
}

pub(crate) async fn storage_classes(client: &Client) -> Vec<String> {
    let api: Api<StorageClass> = Api::all(client.clone());
    match api.list(&ListParams::default()).await {
        Ok(list) => list
            .items
            .into_iter()
            .filter_map(|class| class.metadata.name)
            .collect(),
        Err(err) => {
            warn!(error = %err, "listing storage classes failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: message.into(),
            reason: "NotFound".into(),
            code,
        })
    }

    #[test]
    fn only_object_level_404_counts_as_present() {
        let object_missing = api_error(
            404,
            "horizontalpodautoscalers.autoscaling \"dokploy-capability-probe\" not found",
        );
        assert!(is_probe_miss(&object_missing));

        let route_missing = api_error(404, "the server could not find the requested resource");
        assert!(!is_probe_miss(&route_missing));
    }

    #[test]
    fn custom_kinds_pluralize_by_suffix() {
        let route = ingress_route_resource();
        assert_eq!(route.group, "traefik.io");
        assert_eq!(route.version, "v1alpha1");
        assert_eq!(route.plural, "ingressroutes");
        assert_eq!(route.api_version, "traefik.io/v1alpha1");

        let metrics = pod_metrics_resource();
        assert_eq!(metrics.plural, "pods");
        assert_eq!(hpa_resource().plural, "horizontalpodautoscalers");
    }
}
