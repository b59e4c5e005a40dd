//! Réduction de la surface d'attaque SMB
//!
//! Vérifications ponctuelles héritées du durcissement EternalBlue: version
//! de Samba corrigée côté Linux, correctif MS17-010 côté Windows. Quand le
//! système est vulnérable, le service est arrêté (ou SMBv1 désactivé) et
//! le port 445 fermé au niveau du pare-feu. Aucune étape n'est fatale:
//! chaque action journalise son résultat et la synthèse est retournée.

use anyhow::Result;
use log::{info, warn};
use std::cmp::Ordering;
use std::process::Command;

/// Versions de Samba corrigées (CVE-2017-7494 et associées)
const SAFE_SAMBA_VERSIONS: [&str; 3] = ["4.6.16", "4.7.10", "4.8.3"];

/// Correctif MS17-010
const REQUIRED_KB: &str = "KB4012211";

const SERVICE_NAME: &str = "smbd";

/// Synthèse d'une passe de durcissement
#[derive(Debug, Default)]
pub struct HardeningSummary {
    pub vulnerable: bool,
    pub actions: Vec<String>,
    pub failures: Vec<String>,
}

/// Lance la passe de durcissement adaptée à la plateforme
pub fn run(check_only: bool) -> Result<HardeningSummary> {
    if cfg!(windows) {
        harden_windows(check_only)
    } else {
        harden_linux(check_only)
    }
}

fn harden_linux(check_only: bool) -> Result<HardeningSummary> {
    let mut summary = HardeningSummary::default();

    info!("Vérification du risque EternalBlue (Linux/Samba)");

    let version = match samba_version() {
        Some(version) => version,
        None => {
            info!("Samba n'est pas installé, aucun risque de ce côté");
            return Ok(summary);
        }
    };

    info!("Version de Samba installée: {}", version);

    if is_samba_version_safe(&version) {
        info!("Version de Samba corrigée, rien à faire");
        return Ok(summary);
    }

    summary.vulnerable = true;
    warn!("Samba {} est exposé aux vulnérabilités de type EternalBlue", version);

    if check_only {
        info!("Mode vérification: aucune modification appliquée");
        return Ok(summary);
    }

    if stop_samba_service() {
        summary
            .actions
            .push(format!("service {} arrêté et désactivé", SERVICE_NAME));
    } else {
        summary
            .failures
            .push(format!("arrêt du service {} impossible", SERVICE_NAME));
    }

    if block_port_445_linux() {
        summary
            .actions
            .push("port TCP 445 fermé via iptables".to_string());
    } else {
        summary
            .failures
            .push("fermeture du port 445 via iptables impossible".to_string());
    }

    Ok(summary)
}

fn harden_windows(check_only: bool) -> Result<HardeningSummary> {
    let mut summary = HardeningSummary::default();

    info!("Vérification du risque EternalBlue (Windows/MS17-010)");

    if patch_installed() {
        info!("Correctif {} présent, système protégé", REQUIRED_KB);
        return Ok(summary);
    }

    summary.vulnerable = true;
    warn!("Correctif {} absent, système exposé à EternalBlue", REQUIRED_KB);

    if check_only {
        info!("Mode vérification: aucune modification appliquée");
        return Ok(summary);
    }

    if disable_smbv1() {
        summary.actions.push("protocole SMBv1 désactivé".to_string());
    } else {
        summary
            .failures
            .push("désactivation de SMBv1 impossible".to_string());
    }

    if block_port_445_windows() {
        summary
            .actions
            .push("port TCP 445 fermé via le pare-feu Windows".to_string());
    } else {
        summary
            .failures
            .push("fermeture du port 445 via le pare-feu Windows impossible".to_string());
    }

    Ok(summary)
}

/// Interroge `smbd --version` (`Version 4.5.1` -> `4.5.1`)
fn samba_version() -> Option<String> {
    let output = Command::new(SERVICE_NAME).arg("--version").output().ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.contains("Version") {
        return None;
    }
    stdout.split_whitespace().last().map(|v| v.to_string())
}

/// Une version est sûre si elle atteint le correctif de sa branche, ou
/// dépasse la plus récente des branches corrigées.
fn is_samba_version_safe(version: &str) -> bool {
    for safe in SAFE_SAMBA_VERSIONS {
        if same_branch(version, safe) {
            return compare_versions(version, safe) != Ordering::Less;
        }
    }

    let newest = SAFE_SAMBA_VERSIONS[SAFE_SAMBA_VERSIONS.len() - 1];
    compare_versions(version, newest) != Ordering::Less
}

fn parse_version(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .collect()
}

fn same_branch(a: &str, b: &str) -> bool {
    let a = parse_version(a);
    let b = parse_version(b);
    a.len() >= 2 && b.len() >= 2 && a[0] == b[0] && a[1] == b[1]
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = parse_version(a);
    let b = parse_version(b);
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn stop_samba_service() -> bool {
    let stopped = run_command("systemctl", &["stop", SERVICE_NAME]);
    let disabled = run_command("systemctl", &["disable", SERVICE_NAME]);
    if stopped && disabled {
        info!("Service {} arrêté et désactivé", SERVICE_NAME);
        true
    } else {
        warn!("Impossible d'arrêter complètement le service {}", SERVICE_NAME);
        false
    }
}

fn block_port_445_linux() -> bool {
    let blocked = run_command(
        "iptables",
        &["-A", "INPUT", "-p", "tcp", "--dport", "445", "-j", "DROP"],
    );
    if blocked {
        info!("Port TCP 445 fermé via iptables");
    } else {
        warn!("Fermeture du port 445 via iptables impossible");
    }
    blocked
}

/// Cherche le correctif MS17-010 dans la liste des correctifs installés
fn patch_installed() -> bool {
    let output = match Command::new("wmic").args(["qfe", "get", "HotFixID"]).output() {
        Ok(output) => output,
        Err(e) => {
            warn!("Interrogation des correctifs impossible: {}", e);
            return false;
        }
    };

    String::from_utf8_lossy(&output.stdout)
        .split_whitespace()
        .any(|patch| patch == REQUIRED_KB)
}

fn disable_smbv1() -> bool {
    let disabled = run_command(
        "powershell",
        &[
            "-Command",
            "Set-SmbServerConfiguration -EnableSMB1Protocol $false -Force",
        ],
    );
    if disabled {
        info!("Protocole SMBv1 désactivé");
    } else {
        warn!("Désactivation de SMBv1 impossible");
    }
    disabled
}

fn block_port_445_windows() -> bool {
    let blocked = run_command(
        "netsh",
        &[
            "advfirewall",
            "firewall",
            "add",
            "rule",
            "name=smbguard-port-445",
            "dir=in",
            "action=block",
            "protocol=TCP",
            "localport=445",
        ],
    );
    if blocked {
        info!("Port TCP 445 fermé via le pare-feu Windows");
    } else {
        warn!("Fermeture du port 445 via le pare-feu Windows impossible");
    }
    blocked
}

fn run_command(program: &str, args: &[&str]) -> bool {
    match Command::new(program).args(args).output() {
        Ok(output) => output.status.success(),
        Err(e) => {
            warn!("Exécution de {} impossible: {}", program, e);
            false
        }
    }
}
