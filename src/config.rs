use crate::log_mode::LogMode;
use crate::models::GuardError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "/etc/smbguard/config.json";
const CONFIG_DIR: &str = "/etc/smbguard";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Version actuelle du logiciel
    pub version: String,

    /// Port TCP surveillé (SMB par défaut, cible d'EternalBlue)
    pub target_port: u16,

    /// Nombre de connexions dans la fenêtre avant blocage
    pub threshold: u32,

    /// Fenêtre glissante d'évaluation (en secondes)
    pub window_seconds: u64,

    /// Délai de grâce avant la purge des sources inactives (en secondes)
    pub grace_seconds: u64,

    /// Durée de blocage (en secondes) pour les IPs malveillantes
    pub ban_duration_secs: u64,

    /// Intervalle de la boucle de surveillance (en secondes)
    pub poll_interval_secs: u64,

    /// Délai maximal accordé à chaque appel externe (en secondes)
    pub tick_timeout_secs: u64,

    /// Nombre maximal de tentatives vers le pare-feu
    pub max_backend_retries: u32,

    /// Liste d'IPs en liste blanche (jamais suivies ni bloquées)
    pub whitelist: Vec<String>,

    /// Chemin vers le fichier de log
    pub log_file: String,

    /// Niveau de log
    pub log_level: String,

    /// Mode de journalisation (fichier ou systemd-journal)
    pub log_mode: LogMode,

    /// État actuel du service (actif, passif, arrêté)
    pub service_state: ServiceState,

    /// Fichier d'état persistant (blocages actifs et intentions en attente)
    pub state_file: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ServiceState {
    /// Détection et blocage
    Active,
    /// Détection seule, aucune action de pare-feu
    Passive,
    Stopped,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            version: env!("CARGO_PKG_VERSION").to_string(),
            target_port: 445,
            threshold: 5,
            window_seconds: 60,
            grace_seconds: 120,
            ban_duration_secs: 1800,
            poll_interval_secs: 5,
            tick_timeout_secs: 10,
            max_backend_retries: 3,
            whitelist: vec!["127.0.0.1".to_string(), "::1".to_string()],
            log_file: "/var/log/smbguard/smbguard.log".to_string(),
            log_level: "info".to_string(),
            log_mode: LogMode::File,
            service_state: ServiceState::Stopped,
            state_file: "/var/lib/smbguard/state.json".to_string(),
        }
    }
}

impl Config {
    /// Charge la configuration depuis le fichier
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        if !Path::new(CONFIG_FILE).exists() {
            // Créer la configuration par défaut si elle n'existe pas
            let default_config = Config::default();
            if !Path::new(CONFIG_DIR).exists() {
                fs::create_dir_all(CONFIG_DIR)?;
            }
            default_config.save()?;
            return Ok(default_config);
        }

        let config_content = fs::read_to_string(CONFIG_FILE)?;
        let config: Config = serde_json::from_str(&config_content)?;

        Ok(config)
    }

    /// Sauvegarde la configuration dans le fichier
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !Path::new(CONFIG_DIR).exists() {
            fs::create_dir_all(CONFIG_DIR)?;
        }

        let config_json = serde_json::to_string_pretty(self)?;
        fs::write(CONFIG_FILE, config_json)?;

        Ok(())
    }

    /// Refuse les paramètres indéfinis plutôt que de tourner avec des
    /// seuils dénués de sens. Fatal au démarrage.
    pub fn validate(&self) -> Result<(), GuardError> {
        if self.target_port == 0 {
            return Err(GuardError::ConfigInvalid(
                "target_port doit être un port TCP valide".to_string(),
            ));
        }
        if self.threshold == 0 {
            return Err(GuardError::ConfigInvalid(
                "threshold doit être strictement positif".to_string(),
            ));
        }
        if self.window_seconds == 0 {
            return Err(GuardError::ConfigInvalid(
                "window_seconds doit être strictement positif".to_string(),
            ));
        }
        if self.ban_duration_secs == 0 {
            return Err(GuardError::ConfigInvalid(
                "ban_duration_secs doit être strictement positif".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(GuardError::ConfigInvalid(
                "poll_interval_secs doit être strictement positif".to_string(),
            ));
        }
        if self.tick_timeout_secs == 0 {
            return Err(GuardError::ConfigInvalid(
                "tick_timeout_secs doit être strictement positif".to_string(),
            ));
        }
        if self.max_backend_retries == 0 {
            return Err(GuardError::ConfigInvalid(
                "max_backend_retries doit être strictement positif".to_string(),
            ));
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_seconds)
    }

    pub fn ban_duration(&self) -> Duration {
        Duration::from_secs(self.ban_duration_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.tick_timeout_secs)
    }

    /// Vérifie si une adresse est en liste blanche
    pub fn is_whitelisted(&self, ip: &std::net::IpAddr) -> bool {
        let ip = ip.to_string();
        self.whitelist.iter().any(|allowed| allowed == &ip)
    }
}
