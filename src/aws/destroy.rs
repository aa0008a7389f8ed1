//! `destroy` subcommand

use crate::aws::{
    asg, cluster, deployer_directory,
    ec2::{self, Region},
    ecr, iam, Config, Error, Metadata, Resources, DESTROYED_FILE_NAME, METADATA_FILE_NAME,
};
use std::{fs::File, path::PathBuf};
use tracing::info;

/// Destroys all resources associated with a deployment, in reverse creation
/// order. Accepts either the original config file or a bare tag (using the
/// metadata persisted at create time), so partially created deployments can
/// be cleaned up too.
pub async fn destroy(config_path: Option<&PathBuf>, tag: Option<&str>) -> Result<(), Error> {
    // Resolve the deployment tag
    let tag = match (config_path, tag) {
        (Some(path), _) => {
            let config: Config = {
                let config_file = File::open(path)?;
                serde_yaml::from_reader(config_file)?
            };
            config.tag
        }
        (None, Some(tag)) => tag.to_string(),
        (None, None) => return Err(Error::InvalidConfig("either --config or --tag is required")),
    };
    info!(tag = tag.as_str(), "destroying deployment");

    // Load persisted metadata (the generated cluster name lives there)
    let tag_directory = deployer_directory(Some(&tag));
    let metadata_path = tag_directory.join(METADATA_FILE_NAME);
    if !metadata_path.exists() {
        return Err(Error::DeploymentDoesNotExist(tag.clone()));
    }
    let destroyed_file = tag_directory.join(DESTROYED_FILE_NAME);
    if destroyed_file.exists() {
        return Err(Error::DeploymentAlreadyDestroyed(tag.clone()));
    }
    let metadata: Metadata = {
        let metadata_file = File::open(&metadata_path)?;
        serde_yaml::from_reader(metadata_file)?
    };
    let cluster_name = metadata.cluster_name.clone();
    let resources = Resources::new(&cluster_name, &metadata.service_name);
    info!(
        cluster = cluster_name.as_str(),
        region = metadata.region.as_str(),
        "recovered deployment metadata"
    );

    // Create clients
    let region = Region::new(metadata.region.clone());
    let ec2_client = ec2::create_client(region.clone()).await;
    let ecs_client = cluster::create_client(region.clone()).await;
    let asg_client = asg::create_client(region.clone()).await;
    let ecr_client = ecr::create_client(region.clone()).await;
    let iam_client = iam::create_client(region.clone()).await;

    // Drain and delete the service first so no task holds the host port
    // while the pool shuts down
    if cluster::service_exists(&ecs_client, &cluster_name, &resources.service).await? {
        cluster::scale_service(&ecs_client, &cluster_name, &resources.service, 0).await?;
        cluster::wait_for_service_drained(&ecs_client, &cluster_name, &resources.service).await?;
        cluster::delete_service(&ecs_client, &cluster_name, &resources.service).await?;
    }
    cluster::deregister_task_definitions(&ecs_client, &resources.task_family).await?;
    info!("deregistered task definitions");

    // Terminate the compute pool; container instances deregister from the
    // cluster as they go down
    asg::delete_scaling_group(&asg_client, &resources.scaling_group).await?;
    cluster::wait_for_cluster_drained(&ecs_client, &cluster_name).await?;

    // Cluster, then the capacity provider it referenced
    cluster::delete_cluster(&ecs_client, &cluster_name).await?;
    cluster::delete_capacity_provider(&ecs_client, &resources.capacity_provider).await?;

    // Launch template and security groups (retried while instance network
    // interfaces linger)
    ec2::delete_launch_template(&ec2_client, &resources.launch_template).await?;
    let vpc_id = ec2::find_default_vpc(&ec2_client, &metadata.region).await?;
    for name in [&resources.instances_sg, &resources.cluster_sg] {
        if let Some(sg_id) = ec2::find_security_group(&ec2_client, &vpc_id, name).await? {
            ec2::delete_security_group(&ec2_client, &sg_id).await?;
        }
    }

    // Instance role/profile and the image repository
    iam::destroy_instance_profile(
        &iam_client,
        &resources.instance_role,
        &resources.instance_profile,
    )
    .await?;
    ecr::delete_repository(&ecr_client, &resources.repository).await?;

    // Mark deployment as destroyed
    File::create(destroyed_file)?;
    info!(tag = tag.as_str(), "destroyed deployment");
    Ok(())
}
