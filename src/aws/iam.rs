//! IAM role and instance profile for ECS container instances

use crate::aws::{
    utils::{self, MAX_POLL_ATTEMPTS, RETRY_INTERVAL},
    Error,
};
use aws_config::Region;
use aws_sdk_iam::Client as IamClient;
use tokio::time::sleep;
use tracing::{debug, info};

/// Managed policy granting container instances access to the ECS control plane
const ECS_INSTANCE_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonEC2ContainerServiceforEC2Role";

/// Trust policy allowing EC2 instances to assume the role
const EC2_TRUST_POLICY: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Effect": "Allow",
      "Principal": { "Service": "ec2.amazonaws.com" },
      "Action": "sts:AssumeRole"
    }
  ]
}"#;

/// Creates an IAM client for the specified AWS region
pub async fn create_client(region: Region) -> IamClient {
    IamClient::new(&utils::sdk_config(region).await)
}

/// Creates the instance role and wraps it in an instance profile, tolerating
/// entities left behind by an interrupted run
pub async fn ensure_instance_profile(
    client: &IamClient,
    role_name: &str,
    profile_name: &str,
) -> Result<(), Error> {
    match client
        .create_role()
        .role_name(role_name)
        .assume_role_policy_document(EC2_TRUST_POLICY)
        .send()
        .await
    {
        Ok(_) => info!(role = role_name, "created instance role"),
        Err(e) => {
            let service_err = e.into_service_error();
            if service_err.is_entity_already_exists_exception() {
                debug!(role = role_name, "instance role already exists");
            } else {
                return Err(aws_sdk_iam::Error::from(service_err).into());
            }
        }
    }

    // AttachRolePolicy is idempotent
    client
        .attach_role_policy()
        .role_name(role_name)
        .policy_arn(ECS_INSTANCE_POLICY_ARN)
        .send()
        .await
        .map_err(aws_sdk_iam::Error::from)?;

    match client
        .create_instance_profile()
        .instance_profile_name(profile_name)
        .send()
        .await
    {
        Ok(_) => info!(profile = profile_name, "created instance profile"),
        Err(e) => {
            let service_err = e.into_service_error();
            if service_err.is_entity_already_exists_exception() {
                debug!(profile = profile_name, "instance profile already exists");
            } else {
                return Err(aws_sdk_iam::Error::from(service_err).into());
            }
        }
    }

    match client
        .add_role_to_instance_profile()
        .instance_profile_name(profile_name)
        .role_name(role_name)
        .send()
        .await
    {
        Ok(_) => {}
        Err(e) => {
            let service_err = e.into_service_error();
            // An instance profile holds exactly one role, so a re-run that
            // already attached it reports LimitExceeded
            if !service_err.is_limit_exceeded_exception() {
                return Err(aws_sdk_iam::Error::from(service_err).into());
            }
        }
    }

    // IAM is eventually consistent; wait until the profile is resolvable
    // before handing it to a launch template
    for _ in 0..MAX_POLL_ATTEMPTS {
        if client
            .get_instance_profile()
            .instance_profile_name(profile_name)
            .send()
            .await
            .is_ok()
        {
            return Ok(());
        }
        sleep(RETRY_INTERVAL).await;
    }
    Err(Error::MissingAttribute("instance profile"))
}

/// Tears down the instance profile and role, tolerating entities that are
/// already gone
pub async fn destroy_instance_profile(
    client: &IamClient,
    role_name: &str,
    profile_name: &str,
) -> Result<(), Error> {
    if let Err(e) = client
        .remove_role_from_instance_profile()
        .instance_profile_name(profile_name)
        .role_name(role_name)
        .send()
        .await
    {
        let service_err = e.into_service_error();
        if !service_err.is_no_such_entity_exception() {
            return Err(aws_sdk_iam::Error::from(service_err).into());
        }
    }
    if let Err(e) = client
        .delete_instance_profile()
        .instance_profile_name(profile_name)
        .send()
        .await
    {
        let service_err = e.into_service_error();
        if !service_err.is_no_such_entity_exception() {
            return Err(aws_sdk_iam::Error::from(service_err).into());
        }
    }
    if let Err(e) = client
        .detach_role_policy()
        .role_name(role_name)
        .policy_arn(ECS_INSTANCE_POLICY_ARN)
        .send()
        .await
    {
        let service_err = e.into_service_error();
        if !service_err.is_no_such_entity_exception() {
            return Err(aws_sdk_iam::Error::from(service_err).into());
        }
    }
    if let Err(e) = client.delete_role().role_name(role_name).send().await {
        let service_err = e.into_service_error();
        if !service_err.is_no_such_entity_exception() {
            return Err(aws_sdk_iam::Error::from(service_err).into());
        }
    }
    info!(role = role_name, profile = profile_name, "deleted instance role and profile");
    Ok(())
}
