use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::clients::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    Active,
    Banned,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub state: UserState,
    pub liker_id: Option<String>,
    pub wallet_address: Option<String>,
}

impl User {
    pub fn is_archived(&self) -> bool {
        self.state == UserState::Archived
    }
}

/// Narrow view of the identity service: enough to validate transaction
/// parties and resolve on-chain addresses back to platform users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, ClientError>;
    async fn find_by_wallet(&self, address: &str) -> Result<Option<User>, ClientError>;
}

#[derive(Clone)]
pub struct HttpUserDirectory {
    client: Client,
    base_url: String,
}

impl HttpUserDirectory {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, ClientError> {
        let url = format!("{}/users/{}", self.base_url.trim_end_matches('/'), id);
        let response = self.client.get(&url).send().await?;
        if response.status() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ClientError::Unexpected(format!(
                "user service returned {}",
                response.status()
            )));
        }
        Ok(Some(response.json::<User>().await?))
    }

    async fn find_by_wallet(&self, address: &str) -> Result<Option<User>, ClientError> {
        let url = format!(
            "{}/users/by-wallet/{}",
            self.base_url.trim_end_matches('/'),
            address.to_lowercase()
        );
        let response = self.client.get(&url).send().await?;
        if response.status() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ClientError::Unexpected(format!(
                "user service returned {}",
                response.status()
            )));
        }
        Ok(Some(response.json::<User>().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_user_found() {
        let mut server = mockito::Server::new_async().await;
        let id = Uuid::new_v4();

        let _mock = server
            .mock("GET", format!("/users/{}", id).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"id":"{}","state":"active","liker_id":"alice","wallet_address":null}}"#,
                id
            ))
            .create_async()
            .await;

        let directory = HttpUserDirectory::new(server.url());
        let user = directory.get_user(id).await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.liker_id.as_deref(), Some("alice"));
        assert!(!user.is_archived());
    }

    #[tokio::test]
    async fn test_get_user_absent() {
        let mut server = mockito::Server::new_async().await;
        let id = Uuid::new_v4();

        let _mock = server
            .mock("GET", format!("/users/{}", id).as_str())
            .with_status(404)
            .create_async()
            .await;

        let directory = HttpUserDirectory::new(server.url());
        assert!(directory.get_user(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wallet_lookup_is_case_insensitive() {
        let mut server = mockito::Server::new_async().await;
        let id = Uuid::new_v4();

        let _mock = server
            .mock("GET", "/users/by-wallet/0xabc1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"id":"{}","state":"active","liker_id":null,"wallet_address":"0xAbC1"}}"#,
                id
            ))
            .create_async()
            .await;

        let directory = HttpUserDirectory::new(server.url());
        let user = directory.find_by_wallet("0xAbC1").await.unwrap();
        assert!(user.is_some());
    }
}
