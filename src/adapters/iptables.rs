//! Backend de mitigation iptables (Linux)
//!
//! Une règle DROP par adresse source dans la chaîne INPUT. La présence de
//! la règle est sondée avec `-C` avant toute insertion ou après un échec
//! de suppression, ce qui rend les deux actions idempotentes.

use super::MitigationBackend;
use crate::models::{GuardError, MitigationAction};
use async_trait::async_trait;
use log::{debug, info};
use std::net::IpAddr;
use tokio::process::Command;

pub struct IptablesBackend;

impl IptablesBackend {
    pub fn new() -> Self {
        Self
    }

    async fn run(args: &[&str]) -> Result<std::process::Output, GuardError> {
        Command::new("iptables")
            .args(args)
            .output()
            .await
            .map_err(|e| GuardError::BackendApplyFailed {
                action: args.join(" "),
                detail: format!("exécution d'iptables impossible: {}", e),
            })
    }

    async fn rule_exists(ip: &IpAddr) -> bool {
        let ip = ip.to_string();
        match Self::run(&["-C", "INPUT", "-s", &ip, "-j", "DROP"]).await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }
}

impl Default for IptablesBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MitigationBackend for IptablesBackend {
    async fn apply(&self, action: &MitigationAction) -> Result<(), GuardError> {
        match action {
            MitigationAction::Block(ip, _duration) => {
                if Self::rule_exists(ip).await {
                    debug!("Règle DROP déjà présente pour {}, blocage idempotent", ip);
                    return Ok(());
                }

                let ip_str = ip.to_string();
                let output = Self::run(&["-A", "INPUT", "-s", &ip_str, "-j", "DROP"]).await?;
                if output.status.success() {
                    info!("Règle DROP ajoutée pour {}", ip);
                    Ok(())
                } else {
                    Err(GuardError::BackendApplyFailed {
                        action: format!("{}", action),
                        detail: String::from_utf8_lossy(&output.stderr).into_owned(),
                    })
                }
            }
            MitigationAction::Unblock(ip) => {
                let ip_str = ip.to_string();
                let output = Self::run(&["-D", "INPUT", "-s", &ip_str, "-j", "DROP"]).await?;
                if output.status.success() {
                    info!("Règle DROP retirée pour {}", ip);
                    return Ok(());
                }

                // La règle n'existe plus: déblocage idempotent
                if !Self::rule_exists(ip).await {
                    debug!("Aucune règle DROP pour {}, déblocage sans effet", ip);
                    return Ok(());
                }

                Err(GuardError::BackendApplyFailed {
                    action: format!("{}", action),
                    detail: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
        }
    }
}
