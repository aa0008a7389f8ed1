//! AWS EC2 SDK function wrappers: default VPC lookup, security groups, AMI
//! selection, and the worker launch template

use crate::aws::{
    utils::{self, MAX_POLL_ATTEMPTS, RETRY_INTERVAL},
    Error,
};
pub use aws_config::Region;
use aws_sdk_ec2::{
    error::ProvideErrorMetadata,
    types::{
        Filter, IpPermission, IpRange, LaunchTemplateIamInstanceProfileSpecificationRequest,
        RequestLaunchTemplateData, ResourceType, Tag, TagSpecification,
    },
    Client as Ec2Client,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::time::sleep;
use tracing::{debug, info};

pub use aws_sdk_ec2::types::InstanceType;

/// Name prefix of the ECS-optimized Amazon Linux 2 AMI
const ECS_AMI_NAME_PATTERN: &str = "amzn2-ami-ecs-hvm-*-x86_64-ebs";

/// Creates an EC2 client for the specified AWS region
pub async fn create_client(region: Region) -> Ec2Client {
    Ec2Client::new(&utils::sdk_config(region).await)
}

/// Finds the account's default VPC in the client's region
pub async fn find_default_vpc(client: &Ec2Client, region: &str) -> Result<String, Error> {
    let resp = client
        .describe_vpcs()
        .filters(Filter::builder().name("is-default").values("true").build())
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    resp.vpcs()
        .first()
        .and_then(|vpc| vpc.vpc_id())
        .map(String::from)
        .ok_or_else(|| Error::NoDefaultVpc(region.to_string()))
}

/// Finds the default subnets (one per availability zone) of a VPC
pub async fn find_default_subnets(client: &Ec2Client, vpc_id: &str) -> Result<Vec<String>, Error> {
    let resp = client
        .describe_subnets()
        .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
        .filters(
            Filter::builder()
                .name("default-for-az")
                .values("true")
                .build(),
        )
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    let subnets: Vec<String> = resp
        .subnets()
        .iter()
        .filter_map(|subnet| subnet.subnet_id().map(String::from))
        .collect();
    if subnets.is_empty() {
        return Err(Error::NoDefaultSubnets(vpc_id.to_string()));
    }
    Ok(subnets)
}

/// Creates the cluster-level security group (no extra ingress; egress stays
/// at the AWS default allow-all)
pub async fn create_security_group_cluster(
    client: &Ec2Client,
    vpc_id: &str,
    name: &str,
    tag: &str,
) -> Result<String, Error> {
    create_security_group(client, vpc_id, name, "cluster security group", tag).await
}

/// Creates the worker instance security group, permitting inbound TCP on
/// port 80 from any address and nothing else
pub async fn create_security_group_instances(
    client: &Ec2Client,
    vpc_id: &str,
    name: &str,
    tag: &str,
    port: i32,
) -> Result<String, Error> {
    let sg_id = create_security_group(client, vpc_id, name, "instance security group", tag).await?;
    client
        .authorize_security_group_ingress()
        .group_id(&sg_id)
        .ip_permissions(
            IpPermission::builder()
                .ip_protocol("tcp")
                .from_port(port)
                .to_port(port)
                .ip_ranges(IpRange::builder().cidr_ip("0.0.0.0/0").build())
                .build(),
        )
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    Ok(sg_id)
}

async fn create_security_group(
    client: &Ec2Client,
    vpc_id: &str,
    name: &str,
    description: &str,
    tag: &str,
) -> Result<String, Error> {
    let resp = client
        .create_security_group()
        .group_name(name)
        .description(description)
        .vpc_id(vpc_id)
        .tag_specifications(
            TagSpecification::builder()
                .resource_type(ResourceType::SecurityGroup)
                .tags(Tag::builder().key("deployer").value(tag).build())
                .build(),
        )
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    resp.group_id()
        .map(String::from)
        .ok_or(Error::MissingAttribute("security group id"))
}

/// Looks up a security group by name within a VPC (used during teardown)
pub async fn find_security_group(
    client: &Ec2Client,
    vpc_id: &str,
    name: &str,
) -> Result<Option<String>, Error> {
    let resp = client
        .describe_security_groups()
        .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
        .filters(Filter::builder().name("group-name").values(name).build())
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    Ok(resp
        .security_groups()
        .first()
        .and_then(|sg| sg.group_id())
        .map(String::from))
}

/// Finds the latest ECS-optimized Amazon Linux 2 AMI in the client's region
pub async fn find_latest_ecs_ami(client: &Ec2Client, region: &str) -> Result<String, Error> {
    let resp = client
        .describe_images()
        .owners("amazon")
        .filters(
            Filter::builder()
                .name("name")
                .values(ECS_AMI_NAME_PATTERN)
                .build(),
        )
        .filters(Filter::builder().name("state").values("available").build())
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    let mut images = resp.images().to_vec();
    images.sort_by(|a, b| b.creation_date().cmp(&a.creation_date()));
    images
        .first()
        .and_then(|image| image.image_id())
        .map(String::from)
        .ok_or_else(|| Error::AmiNotFound(region.to_string()))
}

/// Creates the worker launch template: ECS-optimized AMI, instance profile,
/// both security groups, and the bootstrap script registering the instance
/// with the cluster
pub async fn create_launch_template(
    client: &Ec2Client,
    name: &str,
    ami_id: &str,
    instance_type: InstanceType,
    instance_profile: &str,
    security_group_ids: &[String],
    user_data: &str,
) -> Result<String, Error> {
    let mut data = RequestLaunchTemplateData::builder()
        .image_id(ami_id)
        .instance_type(instance_type)
        .iam_instance_profile(
            LaunchTemplateIamInstanceProfileSpecificationRequest::builder()
                .name(instance_profile)
                .build(),
        )
        .user_data(BASE64.encode(user_data));
    for sg_id in security_group_ids {
        data = data.security_group_ids(sg_id);
    }
    let resp = client
        .create_launch_template()
        .launch_template_name(name)
        .launch_template_data(data.build())
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    resp.launch_template()
        .and_then(|lt| lt.launch_template_id())
        .map(String::from)
        .ok_or(Error::MissingAttribute("launch template id"))
}

/// Deletes a launch template, tolerating one that never existed
pub async fn delete_launch_template(client: &Ec2Client, name: &str) -> Result<(), Error> {
    match client
        .delete_launch_template()
        .launch_template_name(name)
        .send()
        .await
    {
        Ok(_) => Ok(()),
        Err(e) => {
            let service_err = e.into_service_error();
            if service_err
                .meta()
                .code()
                .is_some_and(|code| code.contains("NotFound"))
            {
                debug!(template = name, "launch template already gone");
                return Ok(());
            }
            Err(aws_sdk_ec2::Error::from(service_err).into())
        }
    }
}

/// Deletes a security group, retrying while terminating instances still hold
/// a reference to it
pub async fn delete_security_group(client: &Ec2Client, sg_id: &str) -> Result<(), Error> {
    for _ in 0..MAX_POLL_ATTEMPTS {
        match client.delete_security_group().group_id(sg_id).send().await {
            Ok(_) => {
                info!(sg = sg_id, "deleted security group");
                return Ok(());
            }
            Err(e) => {
                let service_err = e.into_service_error();
                match service_err.meta().code() {
                    Some("DependencyViolation") => {
                        debug!(sg = sg_id, "security group still in use, retrying");
                        sleep(RETRY_INTERVAL).await;
                    }
                    Some(code) if code.contains("NotFound") => {
                        debug!(sg = sg_id, "security group already gone");
                        return Ok(());
                    }
                    _ => return Err(aws_sdk_ec2::Error::from(service_err).into()),
                }
            }
        }
    }
    Err(Error::SecurityGroupInUse(sg_id.to_string()))
}
