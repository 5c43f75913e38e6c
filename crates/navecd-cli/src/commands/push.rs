//! `navecd push` - package the current directory and publish it

use navecd_registry::{DistributionClient, ProjectClient, RegistryAuth};

use super::CommandResult;

pub async fn run(url: &str, reference: &str, insecure: bool) -> CommandResult {
    let auth = match (
        std::env::var("NAVECD_REGISTRY_USERNAME"),
        std::env::var("NAVECD_REGISTRY_PASSWORD"),
    ) {
        (Ok(username), Ok(password)) => RegistryAuth::Basic { username, password },
        _ => RegistryAuth::Anonymous,
    };

    let cache_dir = std::env::temp_dir().join("navecd-push");
    let client = ProjectClient::new(DistributionClient::new(insecure), url, cache_dir)
        .with_auth(auth);

    let current_dir = std::env::current_dir()?;
    let digest = client.push_image_from_path(reference, &current_dir).await?;

    println!("Pushed {url}:{reference}");
    println!("Digest: {digest}");
    Ok(())
}
