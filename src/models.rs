use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// État d'une connexion TCP observée
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Established,
    Other,
}

/// Connexion observée vers le port surveillé
///
/// Produite par la source d'événements, consommée une seule fois par le
/// traqueur de fenêtres.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub source_ip: IpAddr,
    pub timestamp: SystemTime,
    pub target_port: u16,
    pub state: ConnectionState,
}

/// Action de mitigation demandée au pare-feu
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum MitigationAction {
    /// Bloquer l'adresse IP pour une certaine durée
    Block(IpAddr, Duration),
    /// Débloquer l'adresse IP
    Unblock(IpAddr),
}

impl MitigationAction {
    pub fn source_ip(&self) -> IpAddr {
        match self {
            MitigationAction::Block(ip, _) => *ip,
            MitigationAction::Unblock(ip) => *ip,
        }
    }
}

impl fmt::Display for MitigationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MitigationAction::Block(ip, duration) => {
                write!(f, "blocage de {} pour {}s", ip, duration.as_secs())
            }
            MitigationAction::Unblock(ip) => write!(f, "déblocage de {}", ip),
        }
    }
}

/// Motif d'un blocage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BlockReason {
    /// Seuil de connexions dépassé dans la fenêtre glissante
    RateThreshold,
}

/// Blocage actif d'une adresse IP
///
/// Invariant: au plus un enregistrement actif par adresse source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    pub ip: IpAddr,
    pub blocked_at: SystemTime,
    pub expires_at: SystemTime,
    pub reason: BlockReason,
    /// Nombre de déblocages échoués lors des balayages d'expiration
    pub unblock_attempts: u32,
}

impl BlockRecord {
    pub fn new(ip: IpAddr, now: SystemTime, duration: Duration) -> Self {
        Self {
            ip,
            blocked_at: now,
            expires_at: now + duration,
            reason: BlockReason::RateThreshold,
            unblock_attempts: 0,
        }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

/// Type de rapport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReportType {
    /// Source suspecte détectée
    Detection,
    /// Action de mitigation effectuée
    Action,
    /// Alerte nécessitant une intervention (échec du pare-feu épuisé)
    Alert,
    /// Avertissement
    Warning,
    /// Information générale
    Info,
}

/// Rapport structuré émis à chaque transition d'état
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub timestamp: SystemTime,
    pub report_type: ReportType,
    pub source_ip: Option<IpAddr>,
    pub message: String,
    pub details: Option<String>,
}

impl Report {
    pub fn new(report_type: ReportType, message: String) -> Self {
        Self {
            timestamp: SystemTime::now(),
            report_type,
            source_ip: None,
            message,
            details: None,
        }
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

/// Erreurs du système de défense
#[derive(Debug, Error)]
pub enum GuardError {
    /// La source d'événements est temporairement injoignable; l'ingestion
    /// du cycle courant est sautée, jamais fatale.
    #[error("source d'événements indisponible: {0}")]
    AdapterUnavailable(String),

    /// Le pare-feu a refusé ou échoué à appliquer une action.
    #[error("échec de l'application ({action}): {detail}")]
    BackendApplyFailed { action: String, detail: String },

    /// Configuration invalide, fatale au démarrage.
    #[error("configuration invalide: {0}")]
    ConfigInvalid(String),
}
