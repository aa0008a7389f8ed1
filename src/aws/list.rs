//! `list` subcommand

use crate::aws::{
    deployer_directory, Error, Metadata, CREATED_FILE_NAME, DESTROYED_FILE_NAME,
    METADATA_FILE_NAME,
};
use std::fs::{self, File};
use tracing::info;

/// Lists all active deployments (created but not destroyed)
pub fn list() -> Result<(), Error> {
    // Check if deployer directory exists
    let deployer_dir = deployer_directory(None);
    if !deployer_dir.exists() {
        info!("no deployments found");
        return Ok(());
    }

    // Collect active deployments
    let mut active = Vec::new();
    for entry in fs::read_dir(&deployer_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }

        // Skip incomplete or destroyed deployments
        let created = path.join(CREATED_FILE_NAME);
        let destroyed = path.join(DESTROYED_FILE_NAME);
        if !created.exists() || destroyed.exists() {
            continue;
        }

        // Load metadata if available, otherwise use directory name as tag
        let metadata_path = path.join(METADATA_FILE_NAME);
        if metadata_path.exists() {
            let file = File::open(&metadata_path)?;
            active.push(serde_yaml::from_reader::<_, Metadata>(file)?);
        } else {
            let Some(tag) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            active.push(Metadata {
                tag: tag.to_string(),
                region: "unknown".to_string(),
                cluster_name: "unknown".to_string(),
                service_name: "unknown".to_string(),
                created_at: 0,
            });
        }
    }

    // Display results sorted by creation time (newest first)
    if active.is_empty() {
        info!("no active deployments");
    } else {
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        for d in &active {
            info!(
                tag = d.tag.as_str(),
                created_at = d.created_at,
                region = d.region.as_str(),
                cluster = d.cluster_name.as_str(),
                service = d.service_name.as_str(),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::utils::random_suffix;

    #[test]
    fn test_list_skips_destroyed_and_reads_metadata() {
        let home = std::env::temp_dir().join(format!("ecs-deployer-{}", random_suffix(8)));
        std::env::set_var("HOME", &home);

        // One active deployment with metadata
        let active_dir = home.join(".ecs_deployer").join("demo");
        fs::create_dir_all(&active_dir).unwrap();
        let metadata = Metadata {
            tag: "demo".to_string(),
            region: "us-east-1".to_string(),
            cluster_name: "dev-cluster-ab12cd".to_string(),
            service_name: "nginx".to_string(),
            created_at: 1,
        };
        let file = File::create(active_dir.join(METADATA_FILE_NAME)).unwrap();
        serde_yaml::to_writer(file, &metadata).unwrap();
        File::create(active_dir.join(CREATED_FILE_NAME)).unwrap();

        // One destroyed deployment
        let destroyed_dir = home.join(".ecs_deployer").join("old");
        fs::create_dir_all(&destroyed_dir).unwrap();
        File::create(destroyed_dir.join(CREATED_FILE_NAME)).unwrap();
        File::create(destroyed_dir.join(DESTROYED_FILE_NAME)).unwrap();

        assert!(list().is_ok());
        fs::remove_dir_all(&home).unwrap();
    }
}
