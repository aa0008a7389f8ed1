//! AWS ECS SDK function wrappers: capacity provider, cluster, task
//! definition, and service

use crate::aws::{
    services::*,
    utils::{self, MAX_POLL_ATTEMPTS, MAX_ROLLOUT_ATTEMPTS, RETRY_INTERVAL},
    Error,
};
use aws_config::Region;
use aws_sdk_ecs::{
    types::{
        AutoScalingGroupProvider, CapacityProviderStrategyItem, Compatibility, ContainerDefinition,
        DeploymentConfiguration, HealthCheck, NetworkMode, PlacementStrategy,
        PlacementStrategyType, PortMapping, TransportProtocol,
    },
    Client as EcsClient,
};
use tokio::time::sleep;
use tracing::{debug, info};

/// Creates an ECS client for the specified AWS region
pub async fn create_client(region: Region) -> EcsClient {
    EcsClient::new(&utils::sdk_config(region).await)
}

/// Strategy routing all tasks through the deployment's capacity provider
fn capacity_provider_strategy(name: &str) -> Result<CapacityProviderStrategyItem, Error> {
    Ok(CapacityProviderStrategyItem::builder()
        .capacity_provider(name)
        .base(CAPACITY_PROVIDER_BASE)
        .weight(CAPACITY_PROVIDER_WEIGHT)
        .build()?)
}

/// Creates a capacity provider bound to the scaling group. Scaling is owned
/// by the group's own tracking policy, so managed scaling is not enabled.
pub async fn create_capacity_provider(
    client: &EcsClient,
    name: &str,
    scaling_group_arn: &str,
) -> Result<(), Error> {
    client
        .create_capacity_provider()
        .name(name)
        .auto_scaling_group_provider(
            AutoScalingGroupProvider::builder()
                .auto_scaling_group_arn(scaling_group_arn)
                .build()?,
        )
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(())
}

/// Creates the cluster with the capacity provider as its default strategy
pub async fn create_cluster(
    client: &EcsClient,
    name: &str,
    capacity_provider: &str,
) -> Result<(), Error> {
    client
        .create_cluster()
        .cluster_name(name)
        .capacity_providers(capacity_provider)
        .default_capacity_provider_strategy(capacity_provider_strategy(capacity_provider)?)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(())
}

/// Registers a task definition revision for the NGINX container: host
/// networking, port 80, 256 MiB soft and hard memory limits, and the curl
/// health check. Returns the revision ARN.
pub async fn register_task_definition(
    client: &EcsClient,
    family: &str,
    container_name: &str,
    image: &str,
) -> Result<String, Error> {
    let container = ContainerDefinition::builder()
        .name(container_name)
        .image(image)
        .essential(true)
        .memory(TASK_MEMORY_MIB)
        .memory_reservation(TASK_MEMORY_RESERVATION_MIB)
        .port_mappings(
            PortMapping::builder()
                .container_port(CONTAINER_PORT)
                .host_port(CONTAINER_PORT)
                .protocol(TransportProtocol::Tcp)
                .build(),
        )
        .health_check(
            HealthCheck::builder()
                .command("CMD-SHELL")
                .command(HEALTH_CHECK_COMMAND)
                .interval(HEALTH_CHECK_INTERVAL)
                .timeout(HEALTH_CHECK_TIMEOUT)
                .retries(HEALTH_CHECK_RETRIES)
                .start_period(HEALTH_CHECK_START_PERIOD)
                .build()?,
        )
        .build();
    let resp = client
        .register_task_definition()
        .family(family)
        .network_mode(NetworkMode::Host)
        .requires_compatibilities(Compatibility::Ec2)
        .container_definitions(container)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    resp.task_definition()
        .and_then(|task| task.task_definition_arn())
        .map(String::from)
        .ok_or(Error::MissingAttribute("task definition arn"))
}

/// Creates the long-running service: tasks spread across instances, routed
/// through the capacity provider, with rollover thresholds that stop the old
/// task before starting its replacement
pub async fn create_service(
    client: &EcsClient,
    cluster: &str,
    service: &str,
    task_definition: &str,
    desired_count: i32,
    capacity_provider: &str,
) -> Result<(), Error> {
    client
        .create_service()
        .cluster(cluster)
        .service_name(service)
        .task_definition(task_definition)
        .desired_count(desired_count)
        .capacity_provider_strategy(capacity_provider_strategy(capacity_provider)?)
        .placement_strategy(
            PlacementStrategy::builder()
                .r#type(PlacementStrategyType::Spread)
                .field("instanceId")
                .build(),
        )
        .deployment_configuration(
            DeploymentConfiguration::builder()
                .minimum_healthy_percent(DEPLOYMENT_MINIMUM_HEALTHY_PERCENT)
                .maximum_percent(DEPLOYMENT_MAXIMUM_PERCENT)
                .build(),
        )
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(())
}

/// Points the service at a new task definition revision and forces a rollout
pub async fn roll_service(
    client: &EcsClient,
    cluster: &str,
    service: &str,
    task_definition: &str,
) -> Result<(), Error> {
    client
        .update_service()
        .cluster(cluster)
        .service(service)
        .task_definition(task_definition)
        .force_new_deployment(true)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(())
}

/// Scales the service to a new desired count
pub async fn scale_service(
    client: &EcsClient,
    cluster: &str,
    service: &str,
    desired_count: i32,
) -> Result<(), Error> {
    client
        .update_service()
        .cluster(cluster)
        .service(service)
        .desired_count(desired_count)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(())
}

/// Returns whether the service exists and is not inactive
pub async fn service_exists(
    client: &EcsClient,
    cluster: &str,
    service: &str,
) -> Result<bool, Error> {
    let resp = client
        .describe_services()
        .cluster(cluster)
        .services(service)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(resp
        .services()
        .first()
        .is_some_and(|s| s.status() != Some("INACTIVE")))
}

/// Waits until the service has a single deployment with all desired tasks
/// running
pub async fn wait_for_service_stable(
    client: &EcsClient,
    cluster: &str,
    service: &str,
    desired_count: i32,
) -> Result<(), Error> {
    for _ in 0..MAX_ROLLOUT_ATTEMPTS {
        let resp = client
            .describe_services()
            .cluster(cluster)
            .services(service)
            .send()
            .await
            .map_err(aws_sdk_ecs::Error::from)?;
        if let Some(state) = resp.services().first() {
            let running = state.running_count();
            let deployments = state.deployments().len();
            if deployments == 1 && running == desired_count {
                return Ok(());
            }
            debug!(
                service,
                running, deployments, "waiting for service to stabilize"
            );
        }
        sleep(RETRY_INTERVAL).await;
    }
    Err(Error::ServiceNotStable(service.to_string()))
}

/// Waits until the service has no running tasks
pub async fn wait_for_service_drained(
    client: &EcsClient,
    cluster: &str,
    service: &str,
) -> Result<(), Error> {
    for _ in 0..MAX_POLL_ATTEMPTS {
        let resp = client
            .describe_services()
            .cluster(cluster)
            .services(service)
            .send()
            .await
            .map_err(aws_sdk_ecs::Error::from)?;
        match resp.services().first() {
            Some(state) if state.running_count() > 0 => {
                debug!(service, running = state.running_count(), "draining service");
                sleep(RETRY_INTERVAL).await;
            }
            _ => return Ok(()),
        }
    }
    Err(Error::ServiceNotStable(service.to_string()))
}

/// Deletes the service
pub async fn delete_service(client: &EcsClient, cluster: &str, service: &str) -> Result<(), Error> {
    client
        .delete_service()
        .cluster(cluster)
        .service(service)
        .force(true)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    info!(service, "deleted service");
    Ok(())
}

/// Deregisters every revision of a task definition family
pub async fn deregister_task_definitions(client: &EcsClient, family: &str) -> Result<(), Error> {
    let mut next_token: Option<String> = None;
    loop {
        let mut request = client.list_task_definitions().family_prefix(family);
        if let Some(token) = next_token {
            request = request.next_token(token);
        }
        let resp = request.send().await.map_err(aws_sdk_ecs::Error::from)?;
        for arn in resp.task_definition_arns() {
            client
                .deregister_task_definition()
                .task_definition(arn)
                .send()
                .await
                .map_err(aws_sdk_ecs::Error::from)?;
            debug!(task_definition = arn, "deregistered task definition");
        }
        next_token = resp.next_token().map(String::from);
        if next_token.is_none() {
            return Ok(());
        }
    }
}

/// Waits until no container instances remain registered with the cluster
/// (they deregister as the scaling group terminates them)
pub async fn wait_for_cluster_drained(client: &EcsClient, cluster: &str) -> Result<(), Error> {
    for _ in 0..MAX_POLL_ATTEMPTS {
        let resp = client
            .describe_clusters()
            .clusters(cluster)
            .send()
            .await
            .map_err(aws_sdk_ecs::Error::from)?;
        match resp.clusters().first() {
            Some(state) if state.registered_container_instances_count() > 0 => {
                debug!(
                    cluster,
                    instances = state.registered_container_instances_count(),
                    "waiting for container instances to deregister"
                );
                sleep(RETRY_INTERVAL).await;
            }
            _ => return Ok(()),
        }
    }
    Err(Error::ClusterNotDrained(cluster.to_string()))
}

/// Deletes the cluster, tolerating one that never existed
pub async fn delete_cluster(client: &EcsClient, cluster: &str) -> Result<(), Error> {
    match client.delete_cluster().cluster(cluster).send().await {
        Ok(_) => {
            info!(cluster, "deleted cluster");
            Ok(())
        }
        Err(e) => {
            let service_err = e.into_service_error();
            if service_err.is_cluster_not_found_exception() {
                debug!(cluster, "cluster already gone");
                return Ok(());
            }
            Err(aws_sdk_ecs::Error::from(service_err).into())
        }
    }
}

/// Returns whether the capacity provider exists (and is not being deleted)
pub async fn capacity_provider_exists(client: &EcsClient, name: &str) -> Result<bool, Error> {
    let resp = client
        .describe_capacity_providers()
        .capacity_providers(name)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(!resp.capacity_providers().is_empty())
}

/// Deletes the capacity provider once its cluster association is gone
pub async fn delete_capacity_provider(client: &EcsClient, name: &str) -> Result<(), Error> {
    if !capacity_provider_exists(client, name).await? {
        debug!(capacity_provider = name, "capacity provider already gone");
        return Ok(());
    }
    client
        .delete_capacity_provider()
        .capacity_provider(name)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    info!(capacity_provider = name, "deleted capacity provider");
    Ok(())
}
