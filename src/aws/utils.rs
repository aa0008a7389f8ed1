//! Shared helpers: SDK configuration, cluster name generation, and docker
//! shell-outs

use crate::aws::{Error, CLUSTER_SUFFIX_LENGTH};
use aws_config::{
    retry::{ReconnectMode, RetryConfig},
    BehaviorVersion, Region, SdkConfig,
};
use rand::Rng;
use std::{path::Path, process::Stdio};
use tokio::{
    io::AsyncWriteExt,
    process::Command,
    time::{sleep, Duration},
};

/// Maximum number of attempts to push an image to the registry
pub const MAX_PUSH_ATTEMPTS: usize = 3;

/// Maximum number of polling attempts for resource state
pub const MAX_POLL_ATTEMPTS: usize = 30;

/// Maximum number of polling attempts for service rollouts (instances must
/// boot and register before the first task can start)
pub const MAX_ROLLOUT_ATTEMPTS: usize = 90;

/// Interval between retries
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Alphabet for cluster name suffixes
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Loads the SDK configuration shared by every client: adaptive retry so the
/// stabilization and drain pollers ride through API throttling
pub async fn sdk_config(region: Region) -> SdkConfig {
    let retry = RetryConfig::adaptive()
        .with_max_attempts(5)
        .with_initial_backoff(Duration::from_millis(500))
        .with_max_backoff(Duration::from_secs(30))
        .with_reconnect_mode(ReconnectMode::ReconnectOnTransientError);
    aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .retry_config(retry)
        .load()
        .await
}

/// Generates a random lowercase alphanumeric suffix
pub fn random_suffix(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// Generates a collision-resistant cluster name from a base name. Called once
/// per deployment; the result is persisted so it is never regenerated on
/// update.
pub fn generate_cluster_name(base_name: &str) -> String {
    format!("{base_name}-{}", random_suffix(CLUSTER_SUFFIX_LENGTH))
}

/// Builds a container image from a local Dockerfile context
pub async fn docker_build(context: &Path, image: &str) -> Result<(), Error> {
    let status = Command::new("docker")
        .arg("build")
        .arg("--platform")
        .arg("linux/amd64")
        .arg("-t")
        .arg(image)
        .arg(context)
        .status()
        .await?;
    if !status.success() {
        return Err(Error::Docker("build"));
    }
    Ok(())
}

/// Logs docker in to a registry, passing the password over stdin
pub async fn docker_login(registry: &str, username: &str, password: &str) -> Result<(), Error> {
    let mut child = Command::new("docker")
        .arg("login")
        .arg("--username")
        .arg(username)
        .arg("--password-stdin")
        .arg(registry)
        .stdin(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(password.as_bytes()).await?;
    }
    let status = child.wait().await?;
    if !status.success() {
        return Err(Error::Docker("login"));
    }
    Ok(())
}

/// Pushes an image to its registry with retries
pub async fn docker_push(image: &str) -> Result<(), Error> {
    for _ in 0..MAX_PUSH_ATTEMPTS {
        let status = Command::new("docker").arg("push").arg(image).status().await?;
        if status.success() {
            return Ok(());
        }
        sleep(RETRY_INTERVAL).await;
    }
    Err(Error::Docker("push"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_config::retry::RetryMode;

    #[tokio::test]
    async fn test_sdk_config_uses_adaptive_retry() {
        let config = sdk_config(Region::new("us-east-1")).await;
        let retry = config.retry_config().unwrap();
        assert_eq!(retry.mode(), RetryMode::Adaptive);
        assert_eq!(retry.max_attempts(), 5);
    }

    #[test]
    fn test_random_suffix_length_and_charset() {
        for _ in 0..100 {
            let suffix = random_suffix(CLUSTER_SUFFIX_LENGTH);
            assert_eq!(suffix.len(), CLUSTER_SUFFIX_LENGTH);
            assert!(suffix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_generated_name_matches_contract() {
        // dev-cluster-[a-z0-9]{6}
        let name = generate_cluster_name("dev-cluster");
        let suffix = name.strip_prefix("dev-cluster-").unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_generated_names_are_distinct() {
        let a = generate_cluster_name("dev-cluster");
        let b = generate_cluster_name("dev-cluster");
        // 36^6 possibilities; a collision here is overwhelmingly unlikely.
        assert_ne!(a, b);
    }
}
