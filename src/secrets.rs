use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};
use vaultrs::auth::approle;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::kv2;

/// Reads payment secrets from Vault using AppRole authentication.
pub struct SecretsManager {
    client: VaultClient,
    kv_mount: String,
}

impl SecretsManager {
    /// True when the environment asks for Vault-sourced secrets.
    pub fn is_configured() -> bool {
        env::var("VAULT_ROLE_ID").map(|v| !v.is_empty()).unwrap_or(false)
    }

    pub async fn new() -> Result<Self> {
        let vault_addr =
            env::var("VAULT_ADDR").unwrap_or_else(|_| "http://127.0.0.1:8200".to_string());
        let role_id = env::var("VAULT_ROLE_ID").context("VAULT_ROLE_ID is required")?;
        let secret_id = env::var("VAULT_SECRET_ID").context("VAULT_SECRET_ID is required")?;
        let auth_mount = env::var("VAULT_AUTH_MOUNT").unwrap_or_else(|_| "auth/approle".to_string());
        let kv_mount = env::var("VAULT_KV_MOUNT").unwrap_or_else(|_| "secret".to_string());

        let mut client = VaultClient::new(
            VaultClientSettingsBuilder::default()
                .address(&vault_addr)
                .build()
                .context("failed to build Vault client settings")?,
        )
        .context("failed to create Vault client")?;

        let auth = approle::login(&mut client, &auth_mount, &role_id, &secret_id)
            .await
            .context("failed to authenticate to Vault with AppRole")?;
        client.set_token(&auth.client_token);

        Ok(Self { client, kv_mount })
    }

    async fn read_key(&self, path: &str, key: &str) -> Result<String> {
        let secret: HashMap<String, String> = kv2::read(&self.client, &self.kv_mount, path)
            .await
            .with_context(|| format!("failed to read secret/{} from Vault", path))?;

        secret
            .get(key)
            .cloned()
            .with_context(|| format!("{} key not found in Vault secret/{}", key, path))
    }

    pub async fn get_webhook_secret(&self) -> Result<String> {
        self.read_key("payments", "webhook_secret").await
    }

    pub async fn get_gateway_access_token(&self) -> Result<String> {
        self.read_key("payments", "gateway_access_token").await
    }
}
