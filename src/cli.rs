use clap::{Parser, Subcommand};

/// Agent de détection et de blocage des scans de type EternalBlue
#[derive(Parser)]
#[command(name = "smbguard", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Démarre la surveillance du port cible
    Run {
        /// Lance le service en arrière-plan
        #[arg(short, long)]
        daemon: bool,
    },
    /// Affiche l'état du service et les blocages actifs
    Status,
    /// Réduit la surface d'attaque SMB (Samba non corrigé, MS17-010)
    Harden {
        /// Vérifie sans modifier le système
        #[arg(long)]
        check: bool,
    },
    /// Recharge la configuration et affiche les paramètres effectifs
    Reload,
}
