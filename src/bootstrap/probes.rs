//! Health probes for the local Kubernetes components

use super::plan::PlanContext;
use super::runtime::Runtime;
use applykit::{HttpGetAction, OneTimeInstruction, Probe};
use std::collections::BTreeMap;

/// Replaced by the runtime name in TLS file paths
const RUNTIME_PLACEHOLDER: &str = "{runtime}";

const KUBELET: &str = "kubelet";

fn probe(http_get: HttpGetAction) -> Probe {
    Probe {
        initial_delay_seconds: 1,
        timeout_seconds: 5,
        success_threshold: 1,
        failure_threshold: 2,
        http_get,
    }
}

fn insecure(url: &str) -> HttpGetAction {
    HttpGetAction {
        url: url.to_string(),
        insecure: true,
        ..HttpGetAction::default()
    }
}

/// Probe templates, TLS paths still carrying the runtime placeholder
fn templates() -> BTreeMap<String, Probe> {
    let tls = |file: &str| format!("/var/lib/rancher/{RUNTIME_PLACEHOLDER}/server/tls/{file}");

    BTreeMap::from([
        (
            "kube-apiserver".to_string(),
            probe(HttpGetAction {
                url: "https://127.0.0.1:6443/readyz".to_string(),
                insecure: false,
                ca_cert: tls("server-ca.crt"),
                client_cert: tls("client-kube-apiserver.crt"),
                client_key: tls("client-kube-apiserver.key"),
            }),
        ),
        (
            "kube-scheduler".to_string(),
            probe(insecure("https://127.0.0.1:10259/healthz")),
        ),
        (
            "kube-controller-manager".to_string(),
            probe(insecure("https://127.0.0.1:10257/healthz")),
        ),
        (
            KUBELET.to_string(),
            probe(HttpGetAction {
                url: "http://127.0.0.1:10248/healthz".to_string(),
                ..HttpGetAction::default()
            }),
        ),
    ])
}

/// Fill in the runtime in TLS paths
///
/// Without a runtime the file locations are unknown, so probes that need
/// them are dropped.
fn instantiate(probes: BTreeMap<String, Probe>, runtime: Option<Runtime>) -> BTreeMap<String, Probe> {
    probes
        .into_iter()
        .filter_map(|(name, mut probe)| {
            let Some(runtime) = runtime else {
                return (!probe.uses_tls_files()).then_some((name, probe));
            };
            let action = &mut probe.http_get;
            for path in [
                &mut action.ca_cert,
                &mut action.client_cert,
                &mut action.client_key,
            ] {
                *path = path.replace(RUNTIME_PLACEHOLDER, runtime.as_str());
            }
            Some((name, probe))
        })
        .collect()
}

/// Every component probe
pub fn all_probes(runtime: Option<Runtime>) -> BTreeMap<String, Probe> {
    instantiate(templates(), runtime)
}

/// Only the kubelet, for nodes without a control plane
pub fn kubelet_probes() -> BTreeMap<String, Probe> {
    let mut probes = templates();
    probes.retain(|name, _| name == KUBELET);
    instantiate(probes, None)
}

/// Probes for a joining node
pub fn join_probes(control_plane: bool, runtime: Runtime) -> BTreeMap<String, Probe> {
    if control_plane {
        all_probes(Some(runtime))
    } else {
        kubelet_probes()
    }
}

/// Block until the plan's probes pass
pub fn wait_instruction(ctx: &PlanContext) -> OneTimeInstruction {
    OneTimeInstruction::command(
        "probes",
        ctx.self_exe.clone(),
        ["probe".to_string(), "--file".to_string(), ctx.plan_file_str()],
    )
}
