use serde::{Deserialize, Serialize};

/// Mode de journalisation des événements
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum LogMode {
    /// Journalisation dans un fichier
    File,
    /// Journalisation via systemd-journal
    SystemdJournal,
}

impl Default for LogMode {
    fn default() -> Self {
        LogMode::File
    }
}
