//! Planificateur de la boucle de surveillance
//!
//! Orchestration des cycles: sondage de la source d'événements, routage
//! vers le traqueur, décisions de mitigation, balayage d'expiration et
//! persistance. Chaque appel externe est borné par un délai; un cycle en
//! échec est journalisé et retenté à l'intervalle suivant, jamais fatal.

use crate::adapters::{EventSource, MitigationBackend};
use crate::config::{Config, ServiceState};
use crate::engine::DecisionEngine;
use crate::logger::Logger;
use crate::models::{ConnectionState, MitigationAction, Report, ReportType};
use crate::tracker::RateWindowTracker;
use anyhow::Result;
use log::{debug, error, info, warn};
use rand::Rng;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time;

pub struct GuardService {
    config: Arc<RwLock<Config>>,
    logger: Arc<Logger>,
    tracker: RateWindowTracker,
    engine: DecisionEngine,
    source: Arc<dyn EventSource>,
    backend: Arc<dyn MitigationBackend>,
    report_tx: mpsc::Sender<Report>,
}

impl GuardService {
    pub async fn new(
        config: Arc<RwLock<Config>>,
        source: Arc<dyn EventSource>,
        backend: Arc<dyn MitigationBackend>,
    ) -> Self {
        let (log_file, log_mode, ban_duration, max_retries) = {
            let config = config.read().await;
            (
                config.log_file.clone(),
                config.log_mode,
                config.ban_duration(),
                config.max_backend_retries,
            )
        };

        let logger = Arc::new(Logger::new_with_mode(log_file, log_mode));
        let (report_tx, mut report_rx) = mpsc::channel::<Report>(256);

        // Tâche de consommation des rapports vers le journal
        let report_logger = logger.clone();
        tokio::spawn(async move {
            while let Some(report) = report_rx.recv().await {
                report_logger.log_report(&report);
            }
        });

        let engine = DecisionEngine::new(ban_duration, max_retries, report_tx.clone());

        Self {
            config,
            logger,
            tracker: RateWindowTracker::new(),
            engine,
            source,
            backend,
            report_tx,
        }
    }

    /// Boucle principale, jusqu'au signal d'arrêt
    ///
    /// L'arrêt est coopératif: le cycle en cours se termine, puis l'état
    /// (blocages actifs et intentions non résolues) est persisté pour le
    /// prochain démarrage.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.restore_state().await;

        let (poll_interval, target_port) = {
            let config = self.config.read().await;
            (config.poll_interval(), config.target_port)
        };

        info!(
            "Surveillance du port {} démarrée (cycle de {}s)",
            target_port,
            poll_interval.as_secs()
        );

        let mut interval = time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("Signal d'arrêt reçu, fin du cycle en cours");
                    break;
                }
            }
        }

        let state_file = { self.config.read().await.state_file.clone() };
        match self.engine.save(&state_file) {
            Ok(()) => info!("État persisté dans {}", state_file),
            Err(e) => error!("Impossible de persister l'état à l'arrêt: {}", e),
        }

        Ok(())
    }

    /// Un cycle complet: ingestion, évaluation, expiration, purge
    pub async fn tick(&mut self) {
        let now = SystemTime::now();
        let config = { self.config.read().await.clone() };

        let touched = self.ingest(&config, now).await;
        self.evaluate_sources(&config, touched, now).await;
        self.expire_blocks(&config, now).await;

        let removed = self.tracker.sweep(now, config.window(), config.grace());
        if removed > 0 {
            debug!("{} source(s) inactive(s) purgée(s) du traqueur", removed);
        }

        if self.engine.is_dirty() {
            if let Err(e) = self.engine.save(&config.state_file) {
                error!("Impossible de persister l'état: {}", e);
            }
        }
    }

    /// Restaure l'état persistant au démarrage
    ///
    /// Les intentions dont le résultat était inconnu à l'arrêt sont
    /// ré-appliquées avant le premier cycle: re-bloquer une source
    /// peut-être déjà bloquée vaut mieux que laisser passer un attaquant.
    pub async fn restore_state(&mut self) {
        let (state_file, max_retries, call_timeout) = {
            let config = self.config.read().await;
            (
                config.state_file.clone(),
                config.max_backend_retries,
                config.tick_timeout(),
            )
        };

        let state = match DecisionEngine::load(&state_file) {
            Ok(state) => state,
            Err(e) => {
                warn!("État persistant illisible, démarrage à vide: {}", e);
                return;
            }
        };

        let now = SystemTime::now();

        if !state.records.is_empty() {
            self.send_report(Report::new(
                ReportType::Info,
                format!("{} blocage(s) restauré(s) depuis l'état persistant", state.records.len()),
            ));
        }
        for record in state.records {
            debug!("Blocage restauré pour {}", record.ip);
            self.engine.restore_record(record);
        }

        for action in state.pending {
            info!("Intention non résolue au dernier arrêt, ré-application: {}", action);
            let applied = self.apply_with_retry(&action, max_retries, call_timeout).await;
            match action {
                MitigationAction::Block(ip, _) if applied => {
                    self.engine.commit_block(ip, now);
                    self.logger.log_block(ip, { self.config.read().await.ban_duration_secs });
                }
                MitigationAction::Unblock(ip) if applied => self.engine.commit_unblock(ip),
                _ => {
                    self.send_report(
                        Report::new(
                            ReportType::Alert,
                            format!("ré-application impossible au démarrage: {}", action),
                        )
                        .with_ip(action.source_ip()),
                    );
                }
            }
        }

        if self.engine.is_dirty() {
            if let Err(e) = self.engine.save(&state_file) {
                error!("Impossible de persister l'état restauré: {}", e);
            }
        }
    }

    /// Sonde la source d'événements et route les événements qualifiants
    ///
    /// Retourne les sources touchées par ce cycle, seules candidates à
    /// l'évaluation. Une source injoignable ou trop lente fait sauter
    /// l'ingestion du cycle, jamais la boucle.
    async fn ingest(&self, config: &Config, _now: SystemTime) -> Vec<IpAddr> {
        let batch = match time::timeout(config.tick_timeout(), self.source.poll()).await {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                warn!("Ingestion sautée pour ce cycle: {}", e);
                self.send_report(Report::new(
                    ReportType::Warning,
                    format!("ingestion sautée: {}", e),
                ));
                return Vec::new();
            }
            Err(_) => {
                warn!("Délai dépassé lors du sondage de la source d'événements");
                self.send_report(Report::new(
                    ReportType::Warning,
                    "délai dépassé lors du sondage de la source d'événements".to_string(),
                ));
                return Vec::new();
            }
        };

        let mut touched = Vec::new();
        for event in batch {
            if event.state != ConnectionState::Established {
                continue;
            }
            if event.target_port != config.target_port {
                continue;
            }
            if config.is_whitelisted(&event.source_ip) {
                continue;
            }

            self.tracker.observe(event.source_ip, event.timestamp);
            if !touched.contains(&event.source_ip) {
                touched.push(event.source_ip);
            }
        }

        touched
    }

    /// Évalue chaque source touchée et applique les intentions de blocage
    async fn evaluate_sources(&mut self, config: &Config, touched: Vec<IpAddr>, now: SystemTime) {
        let mut intents = Vec::new();

        for ip in touched {
            let suspicious =
                self.tracker
                    .is_suspicious(ip, now, config.window(), config.threshold);

            if let Some(intent) = self.engine.evaluate(ip, suspicious, now) {
                let count = self.tracker.count(ip, now, config.window());
                self.send_report(
                    Report::new(
                        ReportType::Detection,
                        format!(
                            "comportement de scan suspect: {} connexions vers le port {} en {}s",
                            count, config.target_port, config.window_seconds
                        ),
                    )
                    .with_ip(ip),
                );
                intents.push(intent);
            }
        }

        if intents.is_empty() {
            return;
        }

        if config.service_state == ServiceState::Passive {
            for intent in &intents {
                info!("Mode passif: {} non appliqué", intent);
            }
            return;
        }

        // Journal d'intentions avant application: une coupure au milieu du
        // cycle sera ré-évaluée au prochain démarrage plutôt que perdue.
        for intent in &intents {
            self.engine.push_pending(*intent);
        }
        if let Err(e) = self.engine.save(&config.state_file) {
            error!("Impossible de journaliser les intentions: {}", e);
        }

        // Application concurrente: l'échec d'une source ne retarde jamais
        // la mitigation des autres.
        let outcomes = futures::future::join_all(intents.iter().map(|intent| {
            self.apply_with_retry(intent, config.max_backend_retries, config.tick_timeout())
        }))
        .await;

        for (intent, applied) in intents.iter().zip(outcomes) {
            self.engine.resolve_pending(intent);
            if applied {
                if let MitigationAction::Block(ip, _) = intent {
                    self.engine.commit_block(*ip, now);
                    self.logger.log_block(*ip, config.ban_duration_secs);
                }
            } else {
                self.send_report(
                    Report::new(
                        ReportType::Alert,
                        format!(
                            "{} refusé par le pare-feu après {} tentative(s); la source reste en attente de blocage",
                            intent, config.max_backend_retries
                        ),
                    )
                    .with_ip(intent.source_ip()),
                );
            }
        }
    }

    /// Balayage d'expiration: retire les blocages dont la durée est écoulée
    async fn expire_blocks(&mut self, config: &Config, now: SystemTime) {
        let expired = self.engine.expired(now);
        if expired.is_empty() {
            return;
        }

        let actions: Vec<MitigationAction> = expired
            .into_iter()
            .map(MitigationAction::Unblock)
            .collect();

        for action in &actions {
            self.engine.push_pending(*action);
        }
        if let Err(e) = self.engine.save(&config.state_file) {
            error!("Impossible de journaliser les intentions: {}", e);
        }

        for action in actions {
            // Une seule tentative par balayage; le compteur borné porté par
            // l'enregistrement décide de l'abandon.
            let applied = matches!(
                time::timeout(config.tick_timeout(), self.backend.apply(&action)).await,
                Ok(Ok(()))
            );

            self.engine.resolve_pending(&action);
            let ip = action.source_ip();
            if applied {
                self.engine.commit_unblock(ip);
                self.logger.log_unblock(ip);
            } else {
                self.engine.record_unblock_failure(ip);
            }
        }
    }

    /// Applique une action avec tentatives bornées et repli exponentiel
    async fn apply_with_retry(
        &self,
        action: &MitigationAction,
        max_retries: u32,
        call_timeout: Duration,
    ) -> bool {
        for attempt in 1..=max_retries {
            match time::timeout(call_timeout, self.backend.apply(action)).await {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => {
                    warn!("Tentative {}/{} échouée ({}): {}", attempt, max_retries, action, e);
                }
                Err(_) => {
                    warn!("Tentative {}/{} ({}): délai dépassé", attempt, max_retries, action);
                }
            }

            if attempt < max_retries {
                // Repli exponentiel avec gigue pour désynchroniser les tentatives
                let base = 100u64.saturating_mul(1 << (attempt - 1).min(6));
                let jitter = rand::rng().random_range(0..=50u64);
                time::sleep(Duration::from_millis(base + jitter)).await;
            }
        }

        false
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn tracker(&self) -> &RateWindowTracker {
        &self.tracker
    }

    fn send_report(&self, report: Report) {
        if let Err(e) = self.report_tx.try_send(report) {
            warn!("Échec de l'envoi du rapport: {}", e);
        }
    }
}
