//! AWS deployment of a containerized NGINX service on ECS.
//!
//! `create` provisions the topology top-down (default VPC, security groups,
//! instance role, image repository, launch template, Auto Scaling Group,
//! capacity provider, cluster, task definition, service), `update` rolls the
//! service onto a freshly built image, and `destroy` tears everything down in
//! reverse. Deployment state (the generated cluster name and lifecycle
//! markers) is persisted under `~/.ecs_deployer/<tag>/` so `update` and
//! `destroy` can recover a deployment from its tag alone.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod asg;
mod cluster;
mod create;
pub use create::create;
mod destroy;
pub use destroy::destroy;
mod ec2;
mod ecr;
mod iam;
mod list;
pub use list::list;
mod services;
mod update;
pub use update::update;
mod utils;

pub const CREATE_CMD: &str = "create";
pub const UPDATE_CMD: &str = "update";
pub const DESTROY_CMD: &str = "destroy";
pub const LIST_CMD: &str = "list";

/// File indicating the deployment was created
const CREATED_FILE_NAME: &str = "created";

/// File indicating the deployment was destroyed
const DESTROYED_FILE_NAME: &str = "destroyed";

/// File containing deployment metadata
const METADATA_FILE_NAME: &str = "metadata.yaml";

/// Length of the random suffix appended to the cluster base name
pub const CLUSTER_SUFFIX_LENGTH: usize = 6;

/// Deployment configuration loaded from the YAML config file
#[derive(Serialize, Deserialize, Clone)]
pub struct Config {
    /// Deployment tag (names the state directory and all AWS resources)
    pub tag: String,
    /// AWS region to deploy into
    pub region: String,
    pub cluster: ClusterConfig,
    pub service: ServiceConfig,
}

/// Cluster and compute pool settings
#[derive(Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Base name for the cluster (a random suffix is appended at create time)
    pub base_name: String,
    /// EC2 instance type for the worker pool
    pub instance_type: String,
    /// Minimum number of instances in the Auto Scaling Group
    pub min_size: i32,
    /// Maximum number of instances in the Auto Scaling Group
    pub max_size: i32,
    /// Target average memory reservation (percent) for the scaling policy
    pub memory_target: f64,
}

/// Containerized service settings
#[derive(Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Service (and container) name
    pub name: String,
    /// Docker build context containing the Dockerfile
    pub context: String,
    /// Number of task copies the service keeps running
    pub desired_count: i32,
}

impl Config {
    /// Validates configured values against the ranges the topology supports
    pub fn validate(&self) -> Result<(), Error> {
        if self.tag.is_empty()
            || !self
                .tag
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::InvalidConfig(
                "tag must be non-empty lowercase alphanumeric (hyphens allowed)",
            ));
        }
        if self.cluster.base_name.is_empty()
            || !self
                .cluster
                .base_name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::InvalidConfig(
                "cluster base_name must be non-empty lowercase alphanumeric (hyphens allowed)",
            ));
        }
        if self.cluster.min_size < 1 || self.cluster.max_size < self.cluster.min_size {
            return Err(Error::InvalidConfig(
                "cluster sizes must satisfy 1 <= min_size <= max_size",
            ));
        }
        if self.cluster.memory_target <= 0.0 || self.cluster.memory_target > 100.0 {
            return Err(Error::InvalidConfig(
                "cluster memory_target must be a percentage in (0, 100]",
            ));
        }
        if self.service.name.is_empty()
            || !self
                .service
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::InvalidConfig(
                "service name must be non-empty lowercase alphanumeric (hyphens allowed)",
            ));
        }
        if self.service.desired_count < 1 {
            return Err(Error::InvalidConfig("service desired_count must be >= 1"));
        }
        Ok(())
    }
}

/// Metadata about a deployment persisted at create time
#[derive(Serialize, Deserialize, Clone)]
pub struct Metadata {
    pub tag: String,
    pub region: String,
    /// Generated cluster name (base + random suffix), stable for the
    /// lifetime of the deployment
    pub cluster_name: String,
    pub service_name: String,
    pub created_at: u64,
}

/// Names of the AWS resources belonging to one deployment, all derived from
/// the generated cluster name
pub struct Resources {
    pub cluster_sg: String,
    pub instances_sg: String,
    pub launch_template: String,
    pub scaling_group: String,
    pub scaling_policy: String,
    pub capacity_provider: String,
    pub instance_role: String,
    pub instance_profile: String,
    pub repository: String,
    pub task_family: String,
    pub service: String,
}

impl Resources {
    pub fn new(cluster_name: &str, service_name: &str) -> Self {
        Self {
            cluster_sg: format!("{cluster_name}-cluster"),
            instances_sg: format!("{cluster_name}-instances"),
            launch_template: format!("{cluster_name}-template"),
            scaling_group: format!("{cluster_name}-asg"),
            scaling_policy: format!("{cluster_name}-memory-reservation"),
            capacity_provider: format!("{cluster_name}-capacity"),
            instance_role: format!("{cluster_name}-instance-role"),
            instance_profile: format!("{cluster_name}-instance-profile"),
            repository: format!("{cluster_name}/{service_name}"),
            task_family: format!("{cluster_name}-{service_name}"),
            service: service_name.to_string(),
        }
    }
}

/// Returns the directory where deployment state is stored. With a tag, the
/// per-deployment subdirectory.
pub fn deployer_directory(tag: Option<&str>) -> PathBuf {
    let base = std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    let base = base.join(".ecs_deployer");
    match tag {
        Some(tag) => base.join(tag),
        None => base,
    }
}

/// Errors that can occur when deploying infrastructure
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("ec2 error: {0}")]
    AwsEc2(#[from] aws_sdk_ec2::Error),
    #[error("ecs error: {0}")]
    AwsEcs(#[from] aws_sdk_ecs::Error),
    #[error("autoscaling error: {0}")]
    AwsAutoscaling(#[from] aws_sdk_autoscaling::Error),
    #[error("ecr error: {0}")]
    AwsEcr(#[from] aws_sdk_ecr::Error),
    #[error("iam error: {0}")]
    AwsIam(#[from] aws_sdk_iam::Error),
    #[error("builder error: {0}")]
    AwsBuild(#[from] aws_smithy_types::error::operation::BuildError),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("invalid instance type: {0}")]
    InvalidInstanceType(String),
    #[error("deployment already exists")]
    CreationAttempted,
    #[error("deployment is not complete: {0}")]
    DeploymentNotComplete(String),
    #[error("deployment is already destroyed: {0}")]
    DeploymentAlreadyDestroyed(String),
    #[error("deployment does not exist: {0}")]
    DeploymentDoesNotExist(String),
    #[error("no default VPC in region: {0}")]
    NoDefaultVpc(String),
    #[error("no default subnets in VPC: {0}")]
    NoDefaultSubnets(String),
    #[error("no ECS-optimized AMI found in region: {0}")]
    AmiNotFound(String),
    #[error("missing attribute in AWS response: {0}")]
    MissingAttribute(&'static str),
    #[error("docker {0} failed")]
    Docker(&'static str),
    #[error("malformed ECR authorization token")]
    MalformedRegistryToken,
    #[error("scaling group failed to materialize: {0}")]
    ScalingGroupNotReady(String),
    #[error("scaling group failed to delete: {0}")]
    ScalingGroupNotDeleted(String),
    #[error("service failed to stabilize: {0}")]
    ServiceNotStable(String),
    #[error("cluster failed to drain: {0}")]
    ClusterNotDrained(String),
    #[error("security group still in use: {0}")]
    SecurityGroupInUse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        serde_yaml::from_str(
            r#"
tag: demo
region: us-east-1
cluster:
  base_name: dev-cluster
  instance_type: t3.micro
  min_size: 1
  max_size: 2
  memory_target: 80.0
service:
  name: nginx
  context: nginx
  desired_count: 1
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_config_parses_and_validates() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster.min_size, 1);
        assert_eq!(config.cluster.max_size, 2);
        assert_eq!(config.cluster.memory_target, 80.0);
        assert_eq!(config.service.desired_count, 1);
    }

    #[test]
    fn test_config_rejects_inverted_sizes() {
        let mut config = config();
        config.cluster.min_size = 3;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_zero_min_size() {
        let mut config = config();
        config.cluster.min_size = 0;
        config.cluster.max_size = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_bad_memory_target() {
        let mut config = config();
        config.cluster.memory_target = 0.0;
        assert!(config.validate().is_err());
        config.cluster.memory_target = 100.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_uppercase_tag() {
        let mut config = config();
        config.tag = "Demo".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metadata_roundtrip() {
        let metadata = Metadata {
            tag: "demo".to_string(),
            region: "us-east-1".to_string(),
            cluster_name: "dev-cluster-ab12cd".to_string(),
            service_name: "nginx".to_string(),
            created_at: 1,
        };
        let yaml = serde_yaml::to_string(&metadata).unwrap();
        let parsed: Metadata = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.cluster_name, metadata.cluster_name);
        assert_eq!(parsed.tag, metadata.tag);
    }

    #[test]
    fn test_resource_names_derive_from_cluster() {
        let resources = Resources::new("dev-cluster-ab12cd", "nginx");
        assert_eq!(resources.scaling_group, "dev-cluster-ab12cd-asg");
        assert_eq!(resources.capacity_provider, "dev-cluster-ab12cd-capacity");
        assert_eq!(resources.repository, "dev-cluster-ab12cd/nginx");
        assert_eq!(resources.task_family, "dev-cluster-ab12cd-nginx");
        assert_eq!(resources.service, "nginx");
    }
}
