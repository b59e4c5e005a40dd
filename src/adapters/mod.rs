//! Adaptateurs vers le système d'exploitation
//!
//! Le cœur (traqueur, moteur de décision, planificateur) ne connaît que
//! ces deux interfaces; les implémentations concrètes enveloppent les
//! commandes externes (netstat/ss, iptables, netsh) et restent
//! interchangeables selon la plateforme de déploiement.

mod iptables;
mod netsh;
mod netstat;

pub use iptables::IptablesBackend;
pub use netsh::NetshBackend;
pub use netstat::NetstatEventSource;

use crate::models::{ConnectionEvent, GuardError, MitigationAction};
use async_trait::async_trait;

/// Source d'événements de connexion
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Retourne un lot fini d'événements observés depuis le dernier appel
    ///
    /// L'absence de connexions est un lot vide, jamais une erreur; une
    /// erreur signale une source injoignable et fait sauter l'ingestion du
    /// cycle courant.
    async fn poll(&self) -> Result<Vec<ConnectionEvent>, GuardError>;
}

/// Exécuteur des actions de mitigation contre le filtre de paquets
#[async_trait]
pub trait MitigationBackend: Send + Sync {
    /// Applique une action de blocage ou de déblocage
    ///
    /// Idempotent du point de vue de l'appelant: bloquer une source déjà
    /// bloquée ou débloquer une source déjà débloquée est un succès sans
    /// effet, pas une erreur.
    async fn apply(&self, action: &MitigationAction) -> Result<(), GuardError>;
}
