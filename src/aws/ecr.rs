//! AWS ECR SDK function wrappers for the per-deployment image repository

use crate::aws::{utils, Error};
use aws_config::Region;
use aws_sdk_ecr::Client as EcrClient;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{debug, info};

/// Credentials for pushing to the deployment's registry
pub struct RegistryCredentials {
    /// Registry endpoint (no scheme), e.g. `123456789012.dkr.ecr.us-east-1.amazonaws.com`
    pub registry: String,
    pub username: String,
    pub password: String,
}

/// Creates an ECR client for the specified AWS region
pub async fn create_client(region: Region) -> EcrClient {
    EcrClient::new(&utils::sdk_config(region).await)
}

/// Ensures the image repository exists, returning its URI
pub async fn ensure_repository(client: &EcrClient, name: &str) -> Result<String, Error> {
    match client.create_repository().repository_name(name).send().await {
        Ok(resp) => {
            let uri = resp
                .repository()
                .and_then(|repo| repo.repository_uri())
                .map(String::from)
                .ok_or(Error::MissingAttribute("repository uri"))?;
            info!(repository = name, "created repository");
            Ok(uri)
        }
        Err(e) => {
            let service_err = e.into_service_error();
            if !service_err.is_repository_already_exists_exception() {
                return Err(aws_sdk_ecr::Error::from(service_err).into());
            }
            debug!(repository = name, "repository already exists");
            let resp = client
                .describe_repositories()
                .repository_names(name)
                .send()
                .await
                .map_err(aws_sdk_ecr::Error::from)?;
            resp.repositories()
                .first()
                .and_then(|repo| repo.repository_uri())
                .map(String::from)
                .ok_or(Error::MissingAttribute("repository uri"))
        }
    }
}

/// Fetches docker credentials for the account registry. The authorization
/// token is base64 `username:password`.
pub async fn registry_credentials(client: &EcrClient) -> Result<RegistryCredentials, Error> {
    let resp = client
        .get_authorization_token()
        .send()
        .await
        .map_err(aws_sdk_ecr::Error::from)?;
    let data = resp
        .authorization_data()
        .first()
        .ok_or(Error::MissingAttribute("authorization data"))?;
    let token = data
        .authorization_token()
        .ok_or(Error::MissingAttribute("authorization token"))?;
    let decoded = BASE64
        .decode(token)
        .map_err(|_| Error::MalformedRegistryToken)?;
    let decoded = String::from_utf8(decoded).map_err(|_| Error::MalformedRegistryToken)?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or(Error::MalformedRegistryToken)?;
    let registry = data
        .proxy_endpoint()
        .ok_or(Error::MissingAttribute("proxy endpoint"))?
        .trim_start_matches("https://")
        .to_string();
    Ok(RegistryCredentials {
        registry,
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Deletes the repository and all images in it, tolerating one that is
/// already gone
pub async fn delete_repository(client: &EcrClient, name: &str) -> Result<(), Error> {
    match client
        .delete_repository()
        .repository_name(name)
        .force(true)
        .send()
        .await
    {
        Ok(_) => {
            info!(repository = name, "deleted repository");
            Ok(())
        }
        Err(e) => {
            let service_err = e.into_service_error();
            if service_err.is_repository_not_found_exception() {
                debug!(repository = name, "repository already gone");
                return Ok(());
            }
            Err(aws_sdk_ecr::Error::from(service_err).into())
        }
    }
}
