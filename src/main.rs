use anyhow::Context;
use chrono::{DateTime, Local};
use clap::Parser;
use log::{error, info};
use smbguard::adapters::{EventSource, IptablesBackend, MitigationBackend, NetshBackend, NetstatEventSource};
use smbguard::cli::{Cli, Command};
use smbguard::config::{Config, ServiceState};
use smbguard::engine::DecisionEngine;
use smbguard::hardening;
use smbguard::log_mode::LogMode;
use smbguard::service::GuardService;
use std::process::Command as ProcessCommand;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger la configuration pour déterminer le mode de log
    let config = Config::load().unwrap_or_else(|_| Config::default());

    // Initialiser le logger approprié
    match config.log_mode {
        LogMode::File => {
            env_logger::init_from_env(
                env_logger::Env::default().default_filter_or(&config.log_level),
            );
        }
        LogMode::SystemdJournal => {
            // Initialiser le logger systemd-journal uniquement si la feature est activée
            #[cfg(feature = "systemd")]
            {
                use systemd_journal_logger::JournalLog;

                let log_level = match config.log_level.to_lowercase().as_str() {
                    "trace" => log::LevelFilter::Trace,
                    "debug" => log::LevelFilter::Debug,
                    "info" => log::LevelFilter::Info,
                    "warn" => log::LevelFilter::Warn,
                    "error" => log::LevelFilter::Error,
                    _ => log::LevelFilter::Info,
                };

                match JournalLog::new() {
                    Ok(logger) => {
                        if let Err(e) = logger
                            .with_syslog_identifier("smbguard".to_string())
                            .install()
                        {
                            eprintln!("Erreur lors de l'installation du logger systemd: {}", e);
                            env_logger::init_from_env(
                                env_logger::Env::default().default_filter_or(&config.log_level),
                            );
                        } else {
                            log::set_max_level(log_level);
                            info!("Logger systemd initialisé avec niveau: {}", config.log_level);
                        }
                    }
                    Err(e) => {
                        eprintln!("Erreur lors de l'initialisation du logger systemd: {}", e);
                        env_logger::init_from_env(
                            env_logger::Env::default().default_filter_or(&config.log_level),
                        );
                    }
                }
            }

            // Repli si la feature systemd n'est pas activée
            #[cfg(not(feature = "systemd"))]
            {
                eprintln!("AVERTISSEMENT: Le mode SystemdJournal n'est pas disponible (feature 'systemd' non activée). Utilisation du logger standard à la place.");
                env_logger::init_from_env(
                    env_logger::Env::default().default_filter_or(&config.log_level),
                );
            }
        }
    }

    let cli = Cli::parse();

    match cli.command {
        Command::Run { daemon } => {
            if daemon {
                launch_daemon();
                return Ok(());
            }

            // Une configuration invalide est fatale: refuser de tourner
            // avec des seuils indéfinis.
            config.validate().context("démarrage refusé")?;

            let config = Arc::new(RwLock::new(config));
            run_service(config).await
        }
        Command::Status => {
            show_status(&config);
            Ok(())
        }
        Command::Harden { check } => {
            let summary = hardening::run(check)?;
            if !summary.vulnerable {
                println!("Système protégé, aucune action nécessaire.");
            } else if check {
                println!("Système vulnérable (mode vérification, rien n'a été modifié).");
            } else {
                for action in &summary.actions {
                    println!("Fait: {}", action);
                }
                for failure in &summary.failures {
                    println!("Échec: {}", failure);
                }
                if summary.failures.is_empty() {
                    println!("Surface d'attaque réduite.");
                } else {
                    println!("Durcissement incomplet, reprendre manuellement les échecs.");
                }
            }
            Ok(())
        }
        Command::Reload => {
            let config = Config::load()
                .map_err(|e| anyhow::anyhow!("rechargement impossible: {}", e))?;
            config.validate().context("configuration rechargée invalide")?;
            info!("Configuration rechargée avec succès");
            println!("Port surveillé: {}", config.target_port);
            println!(
                "Seuil: {} connexions en {}s",
                config.threshold, config.window_seconds
            );
            println!("Durée de blocage: {}s", config.ban_duration_secs);
            println!("Intervalle de cycle: {}s", config.poll_interval_secs);
            println!("Redémarrez le service pour appliquer les changements.");
            Ok(())
        }
    }
}

/// Démarre la boucle de surveillance avec les adaptateurs de la plateforme
async fn run_service(config: Arc<RwLock<Config>>) -> anyhow::Result<()> {
    {
        let mut config = config.write().await;
        config.service_state = ServiceState::Active;
        if let Err(e) = config.save() {
            error!("Erreur lors de la sauvegarde de la configuration: {}", e);
        }
    }

    let target_port = { config.read().await.target_port };
    let source: Arc<dyn EventSource> = Arc::new(NetstatEventSource::new(target_port));
    let backend: Arc<dyn MitigationBackend> = if cfg!(windows) {
        Arc::new(NetshBackend::new())
    } else {
        Arc::new(IptablesBackend::new())
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut service = GuardService::new(Arc::clone(&config), source, backend).await;
    service.run(shutdown_rx).await?;

    {
        let mut config = config.write().await;
        config.service_state = ServiceState::Stopped;
        if let Err(e) = config.save() {
            error!("Erreur lors de la sauvegarde de la configuration: {}", e);
        }
    }

    Ok(())
}

/// Attend SIGINT ou SIGTERM
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Installation du gestionnaire SIGTERM impossible: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Affiche l'état du service et les blocages actifs
fn show_status(config: &Config) {
    let state = match config.service_state {
        ServiceState::Active => "Actif",
        ServiceState::Passive => "Passif",
        ServiceState::Stopped => "Arrêté",
    };

    println!("État du service: {}", state);
    println!(
        "Port surveillé: {} (seuil {} connexions / {}s)",
        config.target_port, config.threshold, config.window_seconds
    );

    match DecisionEngine::load(&config.state_file) {
        Ok(saved) => {
            if saved.records.is_empty() {
                println!("Aucune IP bloquée.");
            } else {
                println!("IPs bloquées:");
                for record in saved.records {
                    let expires: DateTime<Local> = record.expires_at.into();
                    println!(
                        "  {} (expire le {})",
                        record.ip,
                        expires.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
            if !saved.pending.is_empty() {
                println!("Intentions non résolues: {}", saved.pending.len());
            }
        }
        Err(e) => {
            println!("État persistant illisible: {}", e);
        }
    }
}

/// Lance le service en arrière-plan
fn launch_daemon() {
    let args = std::env::args().collect::<Vec<String>>();
    let executable = &args[0];

    let status = ProcessCommand::new(executable)
        .args(["run"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();

    match status {
        Ok(_) => {
            info!("smbguard démarré en arrière-plan");

            // Attendre un court instant pour que le processus enfant démarre
            std::thread::sleep(Duration::from_millis(500));

            std::process::exit(0);
        }
        Err(e) => {
            error!("Erreur lors du démarrage en arrière-plan: {}", e);
            std::process::exit(1);
        }
    }
}
