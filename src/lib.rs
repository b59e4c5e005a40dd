//! Bibliothèque smbguard pour la détection des scans de type EternalBlue
//!
//! Cette bibliothèque surveille les connexions TCP vers un port de service
//! (SMB par défaut), suit le rythme de connexion de chaque adresse source
//! sur une fenêtre glissante, et bloque temporairement au niveau du
//! pare-feu les sources qui dépassent le seuil configuré.
//!
//! Le cœur (traqueur, moteur de décision, planificateur) est indépendant
//! du système: la lecture des connexions et la manipulation du pare-feu
//! passent par deux adaptateurs interchangeables.

// Modules principaux
pub mod models;   // Structures de données et modèles
pub mod config;   // Configuration du système
pub mod logger;   // Journalisation des événements
pub mod log_mode; // Modes de journalisation

// Cœur de détection et de décision
pub mod tracker; // Fenêtres glissantes par adresse source
pub mod engine;  // Moteur de décision de mitigation
pub mod service; // Boucle de surveillance

// Adaptateurs et utilitaires
pub mod adapters;  // Source d'événements et backend de pare-feu
pub mod hardening; // Réduction de la surface d'attaque SMB
pub mod cli;       // Interface en ligne de commande

// Re-export des structures principales pour faciliter l'utilisation
pub use adapters::{EventSource, IptablesBackend, MitigationBackend, NetshBackend, NetstatEventSource};
pub use config::{Config, ServiceState};
pub use engine::{DecisionEngine, SavedState};
pub use log_mode::LogMode;
pub use models::{
    BlockReason, BlockRecord, ConnectionEvent, ConnectionState, GuardError, MitigationAction,
    Report, ReportType,
};
pub use service::GuardService;
pub use tracker::RateWindowTracker;
