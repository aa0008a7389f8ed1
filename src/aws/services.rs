//! Fixed workload contract for the NGINX service.
//!
//! These values are deliberately constants rather than configuration: host
//! networking pins the container to host port 80, the task reserves and caps
//! memory at 256 MiB, and the deployment percentages (0% minimum healthy,
//! 100% maximum) ensure the old task releases the port before a replacement
//! starts.

/// Container (and host) port the service listens on
pub const CONTAINER_PORT: i32 = 80;

/// Hard memory limit for the task container (MiB)
pub const TASK_MEMORY_MIB: i32 = 256;

/// Soft memory reservation for the task container (MiB)
pub const TASK_MEMORY_RESERVATION_MIB: i32 = 256;

/// Memory (MiB) the ECS agent reserves for itself on each instance
pub const AGENT_RESERVED_MEMORY_MIB: i32 = 256;

/// Health check command executed inside the container
pub const HEALTH_CHECK_COMMAND: &str = "curl --fail http://localhost || exit 1";

/// Seconds between health check probes
pub const HEALTH_CHECK_INTERVAL: i32 = 30;

/// Seconds before a single probe is considered failed
pub const HEALTH_CHECK_TIMEOUT: i32 = 5;

/// Consecutive probe failures before the container is marked unhealthy
pub const HEALTH_CHECK_RETRIES: i32 = 3;

/// Grace period (seconds) before probes begin after container start
pub const HEALTH_CHECK_START_PERIOD: i32 = 5;

/// Minimum healthy percent during a deployment. Zero tolerates the old task
/// being stopped before its replacement starts.
pub const DEPLOYMENT_MINIMUM_HEALTHY_PERCENT: i32 = 0;

/// Maximum percent of desired count during a deployment. With host networking
/// this caps a rollout at one task per host port at a time.
pub const DEPLOYMENT_MAXIMUM_PERCENT: i32 = 100;

/// Base of the capacity provider strategy (tasks always placed through it)
pub const CAPACITY_PROVIDER_BASE: i32 = 1;

/// Weight of the capacity provider strategy
pub const CAPACITY_PROVIDER_WEIGHT: i32 = 1;

/// ECS agent configuration appended to `/etc/ecs/ecs.config` at boot
pub fn agent_config(cluster_name: &str) -> String {
    format!(
        "ECS_CLUSTER={cluster_name}\nECS_ENABLE_CONTAINER_METADATA=true\nECS_RESERVED_MEMORY={AGENT_RESERVED_MEMORY_MIB}\n"
    )
}

/// Startup script for worker instances: registers the instance with the
/// named cluster via the ECS agent configuration file
pub fn user_data(cluster_name: &str) -> String {
    format!(
        "#!/bin/bash\ncat <<'EOF' >> /etc/ecs/ecs.config\n{}EOF\n",
        agent_config(cluster_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_lines() {
        let config = agent_config("dev-cluster-ab12cd");
        let lines: Vec<&str> = config.lines().collect();
        assert_eq!(
            lines,
            vec![
                "ECS_CLUSTER=dev-cluster-ab12cd",
                "ECS_ENABLE_CONTAINER_METADATA=true",
                "ECS_RESERVED_MEMORY=256",
            ]
        );
    }

    #[test]
    fn test_user_data_appends_to_agent_config() {
        let script = user_data("dev-cluster-ab12cd");
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains(">> /etc/ecs/ecs.config"));
        assert!(script.contains("ECS_CLUSTER=dev-cluster-ab12cd"));
        assert!(script.trim_end().ends_with("EOF"));
    }

    #[test]
    fn test_memory_limits_are_256() {
        assert_eq!(TASK_MEMORY_MIB, 256);
        assert_eq!(TASK_MEMORY_RESERVATION_MIB, 256);
        assert_eq!(AGENT_RESERVED_MEMORY_MIB, 256);
    }

    #[test]
    fn test_rollover_never_doubles_tasks() {
        // 100% of desired count means a replacement task can only start after
        // the old one stops, which host networking requires for port 80.
        assert_eq!(DEPLOYMENT_MINIMUM_HEALTHY_PERCENT, 0);
        assert_eq!(DEPLOYMENT_MAXIMUM_PERCENT, 100);
    }

    #[test]
    fn test_ingress_port_is_80() {
        // The only port ever opened on the instance security group
        assert_eq!(CONTAINER_PORT, 80);
    }

    #[test]
    fn test_capacity_strategy_base_and_weight() {
        assert_eq!(CAPACITY_PROVIDER_BASE, 1);
        assert_eq!(CAPACITY_PROVIDER_WEIGHT, 1);
    }

    #[test]
    fn test_health_check_contract() {
        assert!(HEALTH_CHECK_COMMAND.contains("curl --fail http://localhost"));
        assert_eq!(HEALTH_CHECK_INTERVAL, 30);
        assert_eq!(HEALTH_CHECK_TIMEOUT, 5);
        assert_eq!(HEALTH_CHECK_RETRIES, 3);
        assert_eq!(HEALTH_CHECK_START_PERIOD, 5);
    }
}
