//! `navecd install` - register a GitOpsProject on the cluster

use std::str::FromStr;

use kube::api::{Patch, PatchParams};
use kube::Api;

use navecd_core::{Auth, CloudProvider};
use navecd_kube::{GitOpsProject, GitOpsProjectSpec};

use super::CommandResult;

/// Namespace the controller and its projects live in.
const CONTROLLER_NAMESPACE: &str = "navecd-system";

/// Label routing a project to a controller shard.
const SHARD_LABEL: &str = "navecd.io/shard";

const FIELD_MANAGER: &str = "navecd-cli";

pub struct InstallArgs {
    pub url: String,
    pub reference: String,
    pub dir: String,
    pub name: String,
    pub interval: i64,
    pub shard: Option<String>,
    pub wip: Option<String>,
    pub secret: Option<String>,
    pub insecure: bool,
}

pub async fn run(args: InstallArgs) -> CommandResult {
    let auth = match (&args.wip, &args.secret) {
        (Some(provider), _) => Some(Auth::WorkloadIdentity {
            provider: CloudProvider::from_str(provider)?,
        }),
        (None, Some(secret)) => Some(Auth::SecretRef {
            name: secret.clone(),
        }),
        (None, None) => None,
    };

    if args.insecure {
        eprintln!("Warning: --insecure only affects plain HTTP pulls by the controller");
    }

    let spec = GitOpsProjectSpec {
        url: args.url,
        reference: args.reference,
        dir: args.dir,
        pull_interval_seconds: args.interval,
        suspend: None,
        service_account_name: None,
        auth,
    };
    spec.validate()?;

    let mut project = GitOpsProject::new(&args.name, spec);
    project.metadata.namespace = Some(CONTROLLER_NAMESPACE.to_string());
    if let Some(shard) = &args.shard {
        project
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(SHARD_LABEL.to_string(), shard.clone());
    }

    let client = kube::Client::try_default().await?;
    let api: Api<GitOpsProject> = Api::namespaced(client, CONTROLLER_NAMESPACE);

    let mut params = PatchParams::apply(FIELD_MANAGER);
    params.force = true;
    api.patch(&args.name, &params, &Patch::Apply(&project))
        .await?;

    println!(
        "Registered GitOpsProject {}/{}",
        CONTROLLER_NAMESPACE, args.name
    );
    Ok(())
}
