//! Deploy a containerized NGINX service to an ECS cluster backed by an EC2
//! Auto Scaling Group.
//!
//! The deployment topology is a strictly top-down pipeline of AWS resource
//! creation: the account's default VPC is reused, a pair of security groups
//! restricts worker ingress to port 80, an Auto Scaling Group of small
//! instances registers with a randomly suffixed cluster through the ECS agent,
//! a capacity provider binds that group to the cluster, and a single-task
//! service runs the NGINX container with host networking. Because the task
//! uses host networking, at most one task fits per instance; the service's
//! deployment thresholds (0% minimum healthy, 100% maximum) guarantee the old
//! task is stopped before a replacement binds port 80.

cfg_if::cfg_if! {
    if #[cfg(feature = "aws")] {
        pub mod aws;
    }
}
