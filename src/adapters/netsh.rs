//! Backend de mitigation netsh advfirewall (Windows)
//!
//! Une règle de blocage entrant par adresse source, nommée d'après
//! l'adresse pour que l'ajout et la suppression restent idempotents.

use super::MitigationBackend;
use crate::models::{GuardError, MitigationAction};
use async_trait::async_trait;
use log::{debug, info};
use std::net::IpAddr;
use tokio::process::Command;

pub struct NetshBackend;

impl NetshBackend {
    pub fn new() -> Self {
        Self
    }

    fn rule_name(ip: &IpAddr) -> String {
        format!("smbguard-block-{}", ip)
    }

    async fn run(args: &[String]) -> Result<std::process::Output, GuardError> {
        Command::new("netsh")
            .args(args)
            .output()
            .await
            .map_err(|e| GuardError::BackendApplyFailed {
                action: args.join(" "),
                detail: format!("exécution de netsh impossible: {}", e),
            })
    }

    async fn rule_exists(ip: &IpAddr) -> bool {
        let args = vec![
            "advfirewall".to_string(),
            "firewall".to_string(),
            "show".to_string(),
            "rule".to_string(),
            format!("name={}", Self::rule_name(ip)),
        ];
        match Self::run(&args).await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }
}

impl Default for NetshBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MitigationBackend for NetshBackend {
    async fn apply(&self, action: &MitigationAction) -> Result<(), GuardError> {
        match action {
            MitigationAction::Block(ip, _duration) => {
                if Self::rule_exists(ip).await {
                    debug!("Règle de pare-feu déjà présente pour {}", ip);
                    return Ok(());
                }

                let args = vec![
                    "advfirewall".to_string(),
                    "firewall".to_string(),
                    "add".to_string(),
                    "rule".to_string(),
                    format!("name={}", Self::rule_name(ip)),
                    "dir=in".to_string(),
                    "action=block".to_string(),
                    format!("remoteip={}", ip),
                ];
                let output = Self::run(&args).await?;
                if output.status.success() {
                    info!("Règle de blocage ajoutée pour {}", ip);
                    Ok(())
                } else {
                    Err(GuardError::BackendApplyFailed {
                        action: format!("{}", action),
                        detail: String::from_utf8_lossy(&output.stdout).into_owned(),
                    })
                }
            }
            MitigationAction::Unblock(ip) => {
                let args = vec![
                    "advfirewall".to_string(),
                    "firewall".to_string(),
                    "delete".to_string(),
                    "rule".to_string(),
                    format!("name={}", Self::rule_name(ip)),
                ];
                let output = Self::run(&args).await?;
                if output.status.success() || !Self::rule_exists(ip).await {
                    info!("Règle de blocage retirée pour {}", ip);
                    return Ok(());
                }

                Err(GuardError::BackendApplyFailed {
                    action: format!("{}", action),
                    detail: String::from_utf8_lossy(&output.stdout).into_owned(),
                })
            }
        }
    }
}
