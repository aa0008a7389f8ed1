//! `create` subcommand

use crate::aws::{
    asg, cluster, deployer_directory,
    ec2::{self, InstanceType, Region},
    ecr, iam, services,
    utils::{self, generate_cluster_name},
    Config, Error, Metadata, Resources, CREATED_FILE_NAME, METADATA_FILE_NAME,
};
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use tracing::info;

/// Provisions the full topology: default VPC, security groups, instance
/// role, image repository, launch template, Auto Scaling Group, capacity
/// provider, cluster, task definition, and service
pub async fn create(config_path: &PathBuf) -> Result<(), Error> {
    // Load configuration from YAML file
    let config: Config = {
        let config_file = File::open(config_path)?;
        serde_yaml::from_reader(config_file)?
    };
    config.validate()?;
    let tag = &config.tag;
    info!(tag = tag.as_str(), "loaded configuration");

    // Create the deployment state directory
    let tag_directory = deployer_directory(Some(tag));
    if tag_directory.exists() {
        return Err(Error::CreationAttempted);
    }
    std::fs::create_dir_all(&tag_directory)?;
    info!(path = ?tag_directory, "created tag directory");

    // Generate the cluster name once; it is persisted below and reused by
    // update/destroy rather than regenerated
    let cluster_name = generate_cluster_name(&config.cluster.base_name);
    info!(cluster = cluster_name.as_str(), "generated cluster name");
    let resources = Resources::new(&cluster_name, &config.service.name);

    // Persist deployment metadata early to enable `destroy --tag` on failure
    let metadata = Metadata {
        tag: tag.clone(),
        region: config.region.clone(),
        cluster_name: cluster_name.clone(),
        service_name: config.service.name.clone(),
        created_at: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    };
    let metadata_file = File::create(tag_directory.join(METADATA_FILE_NAME))?;
    serde_yaml::to_writer(metadata_file, &metadata)?;
    info!("persisted deployment metadata");

    // Create clients for the target region
    let region = Region::new(config.region.clone());
    let ec2_client = ec2::create_client(region.clone()).await;
    let ecs_client = cluster::create_client(region.clone()).await;
    let asg_client = asg::create_client(region.clone()).await;
    let ecr_client = ecr::create_client(region.clone()).await;
    let iam_client = iam::create_client(region.clone()).await;
    info!(region = config.region.as_str(), "created AWS clients");

    // Reuse the account's default network
    let vpc_id = ec2::find_default_vpc(&ec2_client, &config.region).await?;
    let subnet_ids = ec2::find_default_subnets(&ec2_client, &vpc_id).await?;
    info!(
        vpc = vpc_id.as_str(),
        subnets = subnet_ids.len(),
        "found default VPC"
    );

    // Security boundary: cluster group plus worker group with ingress
    // restricted to port 80
    let (cluster_sg_id, instances_sg_id) = tokio::try_join!(
        ec2::create_security_group_cluster(&ec2_client, &vpc_id, &resources.cluster_sg, tag),
        ec2::create_security_group_instances(
            &ec2_client,
            &vpc_id,
            &resources.instances_sg,
            tag,
            services::CONTAINER_PORT,
        ),
    )?;
    info!(
        cluster_sg = cluster_sg_id.as_str(),
        instances_sg = instances_sg_id.as_str(),
        "created security groups"
    );

    // Instance role so workers can register with the cluster
    iam::ensure_instance_profile(
        &iam_client,
        &resources.instance_role,
        &resources.instance_profile,
    )
    .await?;

    // Select the AMI and build/push the container image concurrently
    let (ami_id, image) = tokio::try_join!(
        ec2::find_latest_ecs_ami(&ec2_client, &config.region),
        async {
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
            Ok::<String, Error>(image)
        }
    )?;
    info!(ami = ami_id.as_str(), "selected ECS-optimized AMI");

    // Compute pool: launch template bootstrapping workers into the cluster,
    // then the Auto Scaling Group across the default subnets
    let instance_type = InstanceType::try_parse(&config.cluster.instance_type)
        .map_err(|_| Error::InvalidInstanceType(config.cluster.instance_type.clone()))?;
    let launch_template_id = ec2::create_launch_template(
        &ec2_client,
        &resources.launch_template,
        &ami_id,
        instance_type,
        &resources.instance_profile,
        &[cluster_sg_id.clone(), instances_sg_id.clone()],
        &services::user_data(&cluster_name),
    )
    .await?;
    info!(
        template = launch_template_id.as_str(),
        "created launch template"
    );
    asg::create_scaling_group(
        &asg_client,
        &resources.scaling_group,
        &launch_template_id,
        config.cluster.min_size,
        config.cluster.max_size,
        &subnet_ids,
    )
    .await?;
    let scaling_group_arn =
        asg::wait_for_scaling_group_arn(&asg_client, &resources.scaling_group).await?;
    info!(
        group = resources.scaling_group.as_str(),
        "created scaling group"
    );

    // Capacity abstraction and the cluster itself
    cluster::create_capacity_provider(
        &ecs_client,
        &resources.capacity_provider,
        &scaling_group_arn,
    )
    .await?;
    info!(
        capacity_provider = resources.capacity_provider.as_str(),
        "created capacity provider"
    );
    cluster::create_cluster(&ecs_client, &cluster_name, &resources.capacity_provider).await?;
    info!(cluster = cluster_name.as_str(), "created cluster");

    // Adaptive capacity: track average memory reservation of the cluster
    asg::put_memory_tracking_policy(
        &asg_client,
        &resources.scaling_group,
        &resources.scaling_policy,
        &cluster_name,
        config.cluster.memory_target,
    )
    .await?;

    // Workload definition and the service that keeps it scheduled
    let task_definition_arn = cluster::register_task_definition(
        &ecs_client,
        &resources.task_family,
        &config.service.name,
        &image,
    )
    .await?;
    info!(
        task_definition = task_definition_arn.as_str(),
        "registered task definition"
    );
    cluster::create_service(
        &ecs_client,
        &cluster_name,
        &resources.service,
        &task_definition_arn,
        config.service.desired_count,
        &resources.capacity_provider,
    )
    .await?;
    info!(service = resources.service.as_str(), "created service");
    cluster::wait_for_service_stable(
        &ecs_client,
        &cluster_name,
        &resources.service,
        config.service.desired_count,
    )
    .await?;

    // Mark deployment as complete
    File::create(tag_directory.join(CREATED_FILE_NAME))?;
    info!(
        cluster = cluster_name.as_str(),
        service = resources.service.as_str(),
        "deployment complete"
    );
    Ok(())
}
