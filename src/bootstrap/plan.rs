//! Turning a validated configuration into a node plan
//!
//! The node's role selects one of two shapes:
//!
//! - **init** (`cluster-init`): installs the runtime, then the cluster's
//!   bootstrap resources and the operator, and waits for both
//! - **join** (every other role): installs the runtime pointed at an
//!   existing server and waits for the node
//!
//! User pre-instructions run first and post-instructions last in both shapes.

use super::runtime::{self, Runtime};
use super::{images, manifest, operator, probes, registry, token};
use crate::config::{Config, Role, ValidationError};
use anyhow::Result;
use applykit::{File, OneTimeInstruction, Plan, Probe};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Everything about the host a plan depends on besides the config
#[derive(Debug, Clone)]
pub struct PlanContext {
    /// State directory for plan, token and stamps
    pub data_dir: PathBuf,
    /// Directory holding the stable kubeconfig link
    pub config_dir: PathBuf,
    /// Root the host's existing files are read from
    pub host_root: PathBuf,
    /// This executable, for `retry` and `probe` instructions
    pub self_exe: String,
    pub hostname: String,
    /// Resolved Kubernetes version
    pub kubernetes_version: String,
    /// Resolved operator version
    pub operator_version: String,
}

impl PlanContext {
    pub fn plan_file(&self) -> PathBuf {
        self.data_dir.join("plan").join("plan.json")
    }

    pub fn plan_file_str(&self) -> String {
        self.plan_file().display().to_string()
    }

    pub fn token_path(&self) -> String {
        self.data_dir.join("token").display().to_string()
    }

    pub fn kubeconfig_link(&self) -> String {
        self.config_dir.join("kubeconfig.yaml").display().to_string()
    }

    pub fn bootstrap_manifests_path(&self) -> String {
        self.data_dir
            .join("bootstrapmanifests")
            .join("nodestrap.yaml")
            .display()
            .to_string()
    }

    pub fn post_manifests_path(&self) -> String {
        self.data_dir
            .join("bootstrapmanifests")
            .join("post-manifests.yaml")
            .display()
            .to_string()
    }

    pub fn chart_config_path(&self) -> String {
        self.data_dir
            .join("charts")
            .join("nodestrap-operator-config.yaml")
            .display()
            .to_string()
    }

    /// Run `args` through `<self> retry` until it succeeds
    pub fn retry<I>(&self, name: impl Into<String>, args: I) -> OneTimeInstruction
    where
        I: IntoIterator<Item = String>,
    {
        let args = std::iter::once("retry".to_string()).chain(args);
        OneTimeInstruction::command(name, self.self_exe.clone(), args)
    }
}

/// Accumulates a plan in order
#[derive(Debug, Default)]
pub struct PlanBuilder {
    plan: Plan,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file; `None` is skipped
    pub fn add_file(&mut self, file: impl Into<Option<File>>) -> &mut Self {
        if let Some(file) = file.into() {
            self.plan.files.push(file);
        }
        self
    }

    pub fn add_instruction(&mut self, instruction: OneTimeInstruction) -> &mut Self {
        self.plan.one_time_instructions.push(instruction);
        self
    }

    /// Wrap the instructions with the user's pre and post instructions
    ///
    /// Each user instruction gets the runtime's kubeconfig in its environment.
    pub fn wrap_user_instructions(&mut self, cfg: &Config, runtime: Runtime) -> &mut Self {
        let env = runtime.kubectl_env();
        let with_env = |instruction: &OneTimeInstruction| {
            instruction.clone().with_env([env.clone()])
        };

        let mut instructions: Vec<OneTimeInstruction> =
            cfg.pre_instructions.iter().map(with_env).collect();
        instructions.append(&mut self.plan.one_time_instructions);
        instructions.extend(cfg.post_instructions.iter().map(with_env));

        self.plan.one_time_instructions = instructions;
        self
    }

    pub fn finish(self, probes: BTreeMap<String, Probe>) -> Plan {
        let mut plan = self.plan;
        plan.probes = probes;
        plan
    }
}

/// Build the plan for `cfg`
///
/// Unknown runtimes and missing join information are validation errors.
pub fn build_plan(cfg: &Config, ctx: &PlanContext) -> Result<Plan> {
    let runtime = Runtime::from_version(&ctx.kubernetes_version)
        .ok_or_else(|| ValidationError::UnknownRuntime(ctx.kubernetes_version.clone()))?;
    let role = cfg.role().ok_or(ValidationError::MissingRoleOrServer)?;

    match role {
        Role::ClusterInit => init_plan(cfg, ctx, runtime),
        Role::Server | Role::Agent | Role::Etcd | Role::ControlPlane | Role::EtcdControlPlane => {
            join_plan(cfg, ctx, runtime, role)
        }
    }
}

fn init_plan(cfg: &Config, ctx: &PlanContext, runtime: Runtime) -> Result<Plan> {
    log::info!("Generating init plan");

    let mut cfg = cfg.clone();
    cfg.runtime.token = token::assign(&cfg.runtime.token, &ctx.host_root, runtime)?;

    let image = images::runtime_installer(&cfg, runtime, &ctx.kubernetes_version);
    let node = manifest::node_name(&cfg.runtime.node_name, &ctx.hostname);

    let (post, user): (Vec<Value>, Vec<Value>) = cfg
        .manifest
        .iter()
        .cloned()
        .partition(manifest::is_operator_resource);
    let bootstrap = manifest::bootstrap_resources(
        &user,
        &node,
        &cfg.runtime.token,
        runtime,
        &ctx.operator_version,
    );

    let mut builder = PlanBuilder::new();
    builder
        .add_file(runtime::config_file(&cfg.runtime, runtime)?)
        .add_file(manifest::manifest_file(&post, ctx.post_manifests_path())?)
        .add_file(runtime::token_file(&cfg.runtime.token, ctx))
        .add_file(registry::registries_file(cfg.registries.as_ref(), runtime)?)
        .add_file(manifest::manifest_file(&bootstrap, ctx.bootstrap_manifests_path())?)
        .add_file(operator::chart_config_file(&cfg, ctx)?);

    builder
        .add_instruction(runtime::install_instruction(&cfg, runtime, &image))
        .add_instruction(probes::wait_instruction(ctx))
        .add_instruction(runtime::symlink_kubeconfig(runtime, ctx))
        .add_instruction(manifest::apply_instruction(
            "bootstrap-manifests",
            ctx.bootstrap_manifests_path(),
            runtime,
            ctx,
        ))
        .add_instruction(operator::apply_chart_config(runtime, ctx))
        .add_instruction(operator::install_instruction(
            &cfg,
            runtime,
            &ctx.operator_version,
        ))
        .add_instruction(operator::wait_operator(runtime, ctx))
        .add_instruction(operator::wait_operator_webhook(runtime, ctx));

    if !post.is_empty() {
        builder.add_instruction(manifest::apply_instruction(
            "apply-post-manifests",
            ctx.post_manifests_path(),
            runtime,
            ctx,
        ));
    }

    builder
        .add_instruction(operator::wait_upgrade_controller(runtime, ctx))
        .add_instruction(runtime::wait_node_ready(&node, runtime, ctx))
        .wrap_user_instructions(&cfg, runtime);

    Ok(builder.finish(probes::all_probes(Some(runtime))))
}

fn join_plan(cfg: &Config, ctx: &PlanContext, runtime: Runtime, role: Role) -> Result<Plan> {
    if cfg.runtime.server.is_empty() || cfg.runtime.token.is_empty() {
        return Err(ValidationError::MissingJoinInfo.into());
    }

    log::info!("Generating join plan for role {role}");

    let image = images::runtime_installer(cfg, runtime, &ctx.kubernetes_version);

    let mut builder = PlanBuilder::new();
    builder
        .add_file(runtime::config_file(&cfg.runtime, runtime)?)
        .add_file(runtime::token_file(&cfg.runtime.token, ctx))
        .add_instruction(runtime::install_instruction(cfg, runtime, &image))
        .add_instruction(probes::wait_instruction(ctx));

    if role.is_worker_only() {
        builder.add_instruction(runtime::wait_agent_active(runtime, ctx));
    } else {
        let node = manifest::node_name(&cfg.runtime.node_name, &ctx.hostname);
        builder
            .add_instruction(runtime::symlink_kubeconfig(runtime, ctx))
            .add_instruction(runtime::wait_node_ready(&node, runtime, ctx));
    }

    builder.wrap_user_instructions(cfg, runtime);

    Ok(builder.finish(probes::join_probes(
        role.capabilities().control_plane,
        runtime,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Overrides, apply_overrides, validate};
    use serde_json::json;
    use tempfile::TempDir;

    fn context(temp: &TempDir, version: &str) -> PlanContext {
        PlanContext {
            data_dir: temp.path().join("data"),
            config_dir: temp.path().join("etc"),
            host_root: temp.path().join("host"),
            self_exe: "/usr/bin/nodestrap".to_string(),
            hostname: "Node-1.example.com".to_string(),
            kubernetes_version: version.to_string(),
            operator_version: "v0.2.0".to_string(),
        }
    }

    fn resolved(mut cfg: Config) -> Config {
        apply_overrides(&mut cfg, &Overrides::default());
        validate(&cfg).unwrap();
        cfg
    }

    fn file_content(plan: &Plan, path: &str) -> String {
        String::from_utf8(plan.file(path).unwrap().decode().unwrap()).unwrap()
    }

    #[test]
    fn test_agent_join_plan() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "v1.30.2+k3s1");
        let mut cfg = Config::default();
        cfg.runtime.server = "https://host:6443".to_string();
        cfg.runtime.token = "abc".to_string();

        let plan = build_plan(&resolved(cfg), &ctx).unwrap();

        let paths: Vec<&str> = plan.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                Runtime::K3s.config_path(),
                ctx.token_path(),
            ]
        );
        assert_eq!(
            plan.instruction_names(),
            vec!["install-k3s", "probes", "wait-agent-node-ready"]
        );
        assert_eq!(plan.probes.keys().collect::<Vec<_>>(), vec!["kubelet"]);

        let install = plan.instruction("install-k3s").unwrap();
        assert_eq!(install.env_value("K3S_URL"), Some("https://host:6443"));
        assert_eq!(file_content(&plan, &ctx.token_path()), "abc\n");
    }

    #[test]
    fn test_server_join_plan() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "v1.30.2+rke2r1");
        let mut cfg = Config::default();
        cfg.runtime.role = Some(Role::Server);
        cfg.runtime.server = "https://host:9345".to_string();
        cfg.runtime.token = "abc".to_string();

        let plan = build_plan(&resolved(cfg), &ctx).unwrap();

        assert_eq!(
            plan.instruction_names(),
            vec![
                "install-rke2",
                "probes",
                "symlink-kubeconfig-rke2",
                "wait-node-ready"
            ]
        );
        assert_eq!(plan.probes.len(), 4);
        assert_eq!(
            plan.probes["kube-apiserver"].http_get.ca_cert,
            "/var/lib/rancher/rke2/server/tls/server-ca.crt"
        );

        let wait = plan.instruction("wait-node-ready").unwrap();
        assert_eq!(wait.args.last().map(String::as_str), Some("node/node-1"));
        assert_eq!(
            wait.env_value("KUBECONFIG"),
            Some("/etc/rancher/rke2/rke2.yaml")
        );
    }

    #[test]
    fn test_etcd_join_plan_probes_kubelet_only() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "v1.30.2+k3s1");
        let mut cfg = Config::default();
        cfg.runtime.role = Some(Role::Etcd);
        cfg.runtime.server = "https://host:6443".to_string();
        cfg.runtime.token = "abc".to_string();

        let plan = build_plan(&resolved(cfg), &ctx).unwrap();
        assert_eq!(plan.probes.keys().collect::<Vec<_>>(), vec!["kubelet"]);
        assert!(plan.instruction("wait-node-ready").is_some());
    }

    #[test]
    fn test_init_plan() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "v1.30.2+k3s1");
        let mut cfg = Config::default();
        cfg.runtime.role = Some(Role::ClusterInit);
        cfg.post_instructions
            .push(OneTimeInstruction::command("hello", "echo", ["hi"]));
        cfg.pre_instructions
            .push(OneTimeInstruction::command("prepare", "true", Vec::<String>::new()));

        let plan = build_plan(&resolved(cfg), &ctx).unwrap();

        let token = file_content(&plan, &ctx.token_path());
        assert_eq!(token.trim().len(), 54);

        let runtime_config: Value =
            serde_yaml::from_str(&file_content(&plan, &Runtime::K3s.config_path())).unwrap();
        assert_eq!(runtime_config["token"], token.trim());
        assert_eq!(runtime_config["cluster-init"], "true");

        assert_eq!(
            plan.instruction_names(),
            vec![
                "prepare",
                "install-k3s",
                "probes",
                "symlink-kubeconfig-k3s",
                "bootstrap-manifests",
                "apply-operator-chart-config",
                "install-operator",
                "wait-operator",
                "wait-operator-webhook",
                "wait-system-upgrade-controller",
                "wait-node-ready",
                "hello",
            ]
        );
        assert_eq!(
            plan.instruction("hello").unwrap().env_value("KUBECONFIG"),
            Some("/etc/rancher/k3s/k3s.yaml")
        );
        assert_eq!(plan.probes.len(), 4);

        let paths: Vec<&str> = plan.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                Runtime::K3s.config_path(),
                ctx.token_path(),
                ctx.bootstrap_manifests_path(),
                ctx.chart_config_path(),
            ]
        );
    }

    #[test]
    fn test_init_plan_starts_with_install_without_pre_instructions() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "v1.30.2+k3s1");
        let mut cfg = Config::default();
        cfg.runtime.role = Some(Role::ClusterInit);
        cfg.post_instructions
            .push(OneTimeInstruction::command("hello", "echo", ["hi"]));

        let plan = build_plan(&resolved(cfg), &ctx).unwrap();
        let names = plan.instruction_names();
        assert_eq!(names.first(), Some(&"install-k3s"));
        assert_eq!(&names[names.len() - 2..], &["wait-node-ready", "hello"]);
    }

    #[test]
    fn test_init_plan_post_manifests_and_registries() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "v1.30.2+k3s1");
        let mut cfg = Config::default();
        cfg.runtime.role = Some(Role::ClusterInit);
        cfg.manifest = vec![
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "early"}}),
            json!({"apiVersion": "ml.nodestrap.io/v1", "kind": "Notebook", "metadata": {"name": "late"}}),
        ];
        let mut registries = crate::config::Registries::default();
        registries
            .mirrors
            .insert("docker.io".to_string(), json!({"endpoint": ["https://m"]}));
        cfg.registries = Some(registries);

        let plan = build_plan(&resolved(cfg), &ctx).unwrap();

        let post = file_content(&plan, &ctx.post_manifests_path());
        assert!(post.contains("late") && !post.contains("early"));
        let bootstrap = file_content(&plan, &ctx.bootstrap_manifests_path());
        assert!(bootstrap.contains("early") && !bootstrap.contains("late"));
        assert!(plan.file(&Runtime::K3s.registries_path()).is_some());

        let names = plan.instruction_names();
        let post_index = names.iter().position(|n| *n == "apply-post-manifests").unwrap();
        assert_eq!(names[post_index - 1], "wait-operator-webhook");
        assert_eq!(names[post_index + 1], "wait-system-upgrade-controller");
    }

    #[test]
    fn test_init_plan_reuses_existing_token() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "v1.30.2+k3s1");
        let existing = ctx
            .host_root
            .join(Runtime::K3s.config_path().trim_start_matches('/'));
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, "token: kept\n").unwrap();

        let mut cfg = Config::default();
        cfg.runtime.role = Some(Role::ClusterInit);
        let cfg = resolved(cfg);

        let plan = build_plan(&cfg, &ctx).unwrap();
        assert_eq!(file_content(&plan, &ctx.token_path()), "kept\n");
        assert!(cfg.runtime.token.is_empty());
    }

    #[test]
    fn test_unknown_runtime_is_fatal() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "v1.30.2");
        let mut cfg = Config::default();
        cfg.runtime.role = Some(Role::ClusterInit);

        let err = build_plan(&resolved(cfg), &ctx).unwrap_err();
        assert!(err.downcast_ref::<ValidationError>().is_some());
    }

    #[test]
    fn test_join_without_token_is_fatal() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "v1.30.2+k3s1");
        let mut cfg = Config::default();
        cfg.runtime.role = Some(Role::Server);

        let err = build_plan(&cfg, &ctx).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::MissingJoinInfo)
        );
    }

    #[test]
    fn test_probe_instruction_points_at_plan_file() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "v1.30.2+k3s1");
        let instruction = probes::wait_instruction(&ctx);
        assert_eq!(instruction.command, "/usr/bin/nodestrap");
        assert_eq!(instruction.args, vec!["probe".to_string(), "--file".to_string(), ctx.plan_file_str()]);
    }
}
