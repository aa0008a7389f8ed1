//! AWS Auto Scaling SDK function wrappers for the worker instance pool

use crate::aws::{
    utils::{self, MAX_POLL_ATTEMPTS, RETRY_INTERVAL},
    Error,
};
use aws_config::Region;
use aws_sdk_autoscaling::{
    types::{
        CustomizedMetricSpecification, LaunchTemplateSpecification, MetricDimension,
        MetricStatistic, TargetTrackingConfiguration,
    },
    Client as AutoScalingClient,
};
use tokio::time::sleep;
use tracing::{debug, info};

/// Creates an Auto Scaling client for the specified AWS region
pub async fn create_client(region: Region) -> AutoScalingClient {
    AutoScalingClient::new(&utils::sdk_config(region).await)
}

/// Creates the worker Auto Scaling Group spanning the default subnets
pub async fn create_scaling_group(
    client: &AutoScalingClient,
    name: &str,
    launch_template_id: &str,
    min_size: i32,
    max_size: i32,
    subnet_ids: &[String],
) -> Result<(), Error> {
    client
        .create_auto_scaling_group()
        .auto_scaling_group_name(name)
        .launch_template(
            LaunchTemplateSpecification::builder()
                .launch_template_id(launch_template_id)
                .version("$Latest")
                .build(),
        )
        .min_size(min_size)
        .max_size(max_size)
        .desired_capacity(min_size)
        .vpc_zone_identifier(subnet_ids.join(","))
        .send()
        .await
        .map_err(aws_sdk_autoscaling::Error::from)?;
    Ok(())
}

/// Waits for the scaling group to materialize and returns its ARN (required
/// to bind a capacity provider to it)
pub async fn wait_for_scaling_group_arn(
    client: &AutoScalingClient,
    name: &str,
) -> Result<String, Error> {
    for _ in 0..MAX_POLL_ATTEMPTS {
        let resp = client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(name)
            .send()
            .await
            .map_err(aws_sdk_autoscaling::Error::from)?;
        if let Some(arn) = resp
            .auto_scaling_groups()
            .first()
            .and_then(|group| group.auto_scaling_group_arn())
        {
            return Ok(arn.to_string());
        }
        debug!(group = name, "waiting for scaling group");
        sleep(RETRY_INTERVAL).await;
    }
    Err(Error::ScalingGroupNotReady(name.to_string()))
}

/// Attaches a target-tracking policy holding average `MemoryReservation` of
/// the cluster at the configured percentage. Capacity adjustment itself is
/// delegated entirely to the Auto Scaling engine.
pub async fn put_memory_tracking_policy(
    client: &AutoScalingClient,
    group_name: &str,
    policy_name: &str,
    cluster_name: &str,
    target_percent: f64,
) -> Result<(), Error> {
    client
        .put_scaling_policy()
        .auto_scaling_group_name(group_name)
        .policy_name(policy_name)
        .policy_type("TargetTrackingScaling")
        .target_tracking_configuration(
            TargetTrackingConfiguration::builder()
                .customized_metric_specification(
                    CustomizedMetricSpecification::builder()
                        .namespace("AWS/ECS")
                        .metric_name("MemoryReservation")
                        .statistic(MetricStatistic::Average)
                        .dimensions(
                            MetricDimension::builder()
                                .name("ClusterName")
                                .value(cluster_name)
                                .build()?,
                        )
                        .build(),
                )
                .target_value(target_percent)
                .build()?,
        )
        .send()
        .await
        .map_err(aws_sdk_autoscaling::Error::from)?;
    info!(
        group = group_name,
        target = target_percent,
        "attached memory reservation tracking policy"
    );
    Ok(())
}

/// Returns whether the scaling group still exists
pub async fn scaling_group_exists(
    client: &AutoScalingClient,
    name: &str,
) -> Result<bool, Error> {
    let resp = client
        .describe_auto_scaling_groups()
        .auto_scaling_group_names(name)
        .send()
        .await
        .map_err(aws_sdk_autoscaling::Error::from)?;
    Ok(!resp.auto_scaling_groups().is_empty())
}

/// Force-deletes the scaling group (terminating its instances) and waits for
/// it to disappear
pub async fn delete_scaling_group(client: &AutoScalingClient, name: &str) -> Result<(), Error> {
    if !scaling_group_exists(client, name).await? {
        debug!(group = name, "scaling group already gone");
        return Ok(());
    }
    client
        .delete_auto_scaling_group()
        .auto_scaling_group_name(name)
        .force_delete(true)
        .send()
        .await
        .map_err(aws_sdk_autoscaling::Error::from)?;
    for _ in 0..MAX_POLL_ATTEMPTS {
        if !scaling_group_exists(client, name).await? {
            info!(group = name, "deleted scaling group");
            return Ok(());
        }
        debug!(group = name, "waiting for scaling group deletion");
        sleep(RETRY_INTERVAL).await;
    }
    Err(Error::ScalingGroupNotDeleted(name.to_string()))
}
