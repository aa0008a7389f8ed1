//! `update` subcommand

use crate::aws::{
    cluster, deployer_directory,
    ec2::Region,
    ecr, utils, Config, Error, Metadata, Resources, CREATED_FILE_NAME, DESTROYED_FILE_NAME,
    METADATA_FILE_NAME,
};
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use tracing::info;

/// Rebuilds and pushes the container image, registers a new task definition
/// revision, and rolls the service onto it. The service's rollover
/// thresholds ensure the old task is stopped before the replacement binds
/// the host port.
pub async fn update(config_path: &PathBuf) -> Result<(), Error> {
    // Load config
    let config: Config = {
        let config_file = File::open(config_path)?;
        serde_yaml::from_reader(config_file)?
    };
    config.validate()?;
    let tag = &config.tag;
    info!(tag = tag.as_str(), "loaded configuration");

    // Ensure created file exists
    let tag_directory = deployer_directory(Some(tag));
    let created_file = tag_directory.join(CREATED_FILE_NAME);
    if !created_file.exists() {
        return Err(Error::DeploymentNotComplete(tag.clone()));
    }

    // Ensure destroyed file does not exist
    let destroyed_file = tag_directory.join(DESTROYED_FILE_NAME);
    if destroyed_file.exists() {
        return Err(Error::DeploymentAlreadyDestroyed(tag.clone()));
    }

    // Recover the generated cluster name from persisted metadata
    let metadata: Metadata = {
        let metadata_file = File::open(tag_directory.join(METADATA_FILE_NAME))?;
        serde_yaml::from_reader(metadata_file)?
    };
    let resources = Resources::new(&metadata.cluster_name, &metadata.service_name);
    info!(
        cluster = metadata.cluster_name.as_str(),
        "recovered deployment metadata"
    );

    // Rebuild and push the image under the same tag
    let region = Region::new(metadata.region.clone());
    let ecr_client = ecr::create_client(region.clone()).await;
    let repository_uri = ecr::ensure_repository(&ecr_client, &resources.repository).await?;
    let credentials = ecr::registry_credentials(&ecr_client).await?;
    let image = format!("{repository_uri}:{tag}");
    utils::docker_build(Path::new(&config.service.context), &image).await?;
    utils::docker_login(
        &credentials.registry,
        &credentials.username,
        &credentials.password,
    )
    .await?;
    utils::docker_push(&image).await?;
    info!(image = image.as_str(), "built and pushed image");

    // Register a new revision and roll the service onto it
    let ecs_client = cluster::create_client(region).await;
    let task_definition_arn = cluster::register_task_definition(
        &ecs_client,
        &resources.task_family,
        &metadata.service_name,
        &image,
    )
    .await?;
    info!(
        task_definition = task_definition_arn.as_str(),
        "registered task definition"
    );
    cluster::roll_service(
        &ecs_client,
        &metadata.cluster_name,
        &resources.service,
        &task_definition_arn,
    )
    .await?;
    cluster::wait_for_service_stable(
        &ecs_client,
        &metadata.cluster_name,
        &resources.service,
        config.service.desired_count,
    )
    .await?;
    info!(service = resources.service.as_str(), "update complete");
    Ok(())
}
