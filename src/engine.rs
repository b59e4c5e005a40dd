//! Moteur de décision de mitigation
//!
//! Propriétaire exclusif de l'ensemble des blocages actifs. Décide des
//! intentions Block/Unblock à partir des verdicts du traqueur, garantit
//! l'idempotence (jamais de double blocage) et persiste son état pour
//! survivre aux redémarrages.

use crate::models::{BlockRecord, MitigationAction, Report, ReportType};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

/// État persistant du moteur: blocages actifs et intentions dont le
/// résultat était inconnu au moment de l'arrêt.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct SavedState {
    pub records: Vec<BlockRecord>,
    pub pending: Vec<MitigationAction>,
}

pub struct DecisionEngine {
    records: HashMap<IpAddr, BlockRecord>,
    /// Intentions émises mais pas encore confirmées par le pare-feu
    pending: Vec<MitigationAction>,
    ban_duration: Duration,
    max_unblock_attempts: u32,
    report_tx: mpsc::Sender<Report>,
    dirty: bool,
}

impl DecisionEngine {
    pub fn new(
        ban_duration: Duration,
        max_unblock_attempts: u32,
        report_tx: mpsc::Sender<Report>,
    ) -> Self {
        Self {
            records: HashMap::new(),
            pending: Vec::new(),
            ban_duration,
            max_unblock_attempts,
            report_tx,
            dirty: false,
        }
    }

    /// Décide de l'action pour une source au vu de son verdict
    ///
    /// Une source suspecte sans blocage actif produit une intention de
    /// blocage; une source suspecte déjà bloquée ne produit rien (le
    /// blocage n'est jamais dupliqué), mais la détection renouvelée est
    /// rapportée pour l'observabilité.
    pub fn evaluate(
        &self,
        ip: IpAddr,
        is_suspicious: bool,
        _now: SystemTime,
    ) -> Option<MitigationAction> {
        if !is_suspicious {
            return None;
        }

        if self.records.contains_key(&ip) {
            self.send_report(
                Report::new(
                    ReportType::Detection,
                    format!("détection renouvelée pour {} pendant un blocage actif", ip),
                )
                .with_ip(ip),
            );
            return None;
        }

        Some(MitigationAction::Block(ip, self.ban_duration))
    }

    /// Enregistre un blocage confirmé par le pare-feu
    ///
    /// N'est appelé qu'après un succès du backend: un blocage refusé n'est
    /// pas enregistré, et sera retenté au prochain cycle tant que la
    /// source reste suspecte.
    pub fn commit_block(&mut self, ip: IpAddr, now: SystemTime) {
        let record = BlockRecord::new(ip, now, self.ban_duration);
        self.send_report(
            Report::new(
                ReportType::Action,
                format!("IP {} bloquée pour {}s", ip, self.ban_duration.as_secs()),
            )
            .with_ip(ip)
            .with_details("seuil de connexions dépassé".to_string()),
        );
        self.records.insert(ip, record);
        self.dirty = true;
    }

    /// Vérifie si une source est actuellement bloquée
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.records.contains_key(&ip)
    }

    /// Liste les blocages dont la durée est écoulée
    pub fn expired(&self, now: SystemTime) -> Vec<IpAddr> {
        self.records
            .values()
            .filter(|record| record.is_expired(now))
            .map(|record| record.ip)
            .collect()
    }

    /// Retire un blocage après déblocage confirmé par le pare-feu
    pub fn commit_unblock(&mut self, ip: IpAddr) {
        if self.records.remove(&ip).is_some() {
            self.send_report(
                Report::new(
                    ReportType::Action,
                    format!("IP {} débloquée après expiration", ip),
                )
                .with_ip(ip),
            );
            self.dirty = true;
        }
    }

    /// Note l'échec d'un déblocage
    ///
    /// Le blocage est conservé et retenté au prochain balayage, plutôt que
    /// de laisser filtrer un attaquant par un déblocage silencieux. Les
    /// tentatives sont bornées: une fois épuisées, l'échec est remonté en
    /// alerte et l'enregistrement abandonné à l'opérateur (la règle de
    /// pare-feu restante maintient le blocage).
    pub fn record_unblock_failure(&mut self, ip: IpAddr) {
        let exhausted = match self.records.get_mut(&ip) {
            Some(record) => {
                record.unblock_attempts += 1;
                record.unblock_attempts >= self.max_unblock_attempts
            }
            None => return,
        };
        self.dirty = true;

        if exhausted {
            self.records.remove(&ip);
            self.send_report(
                Report::new(
                    ReportType::Alert,
                    format!(
                        "déblocage de {} impossible après {} tentatives, intervention requise",
                        ip, self.max_unblock_attempts
                    ),
                )
                .with_ip(ip),
            );
        } else {
            self.send_report(
                Report::new(
                    ReportType::Warning,
                    format!("échec du déblocage de {}, nouvelle tentative au prochain balayage", ip),
                )
                .with_ip(ip),
            );
        }
    }

    /// Journalise une intention avant son envoi au pare-feu
    pub fn push_pending(&mut self, action: MitigationAction) {
        if !self.pending.contains(&action) {
            self.pending.push(action);
            self.dirty = true;
        }
    }

    /// Retire une intention dont le résultat est connu
    pub fn resolve_pending(&mut self, action: &MitigationAction) {
        self.pending.retain(|pending| pending != action);
        self.dirty = true;
    }

    /// Restaure un blocage depuis l'état persistant, sans rapport
    pub fn restore_record(&mut self, record: BlockRecord) {
        self.records.insert(record.ip, record);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Persiste l'état dans le fichier donné
    pub fn save(&mut self, path: &str) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)
                .context("Impossible de créer le répertoire pour le fichier d'état")?;
        }

        let state = SavedState {
            records: self.records.values().cloned().collect(),
            pending: self.pending.clone(),
        };

        let content = serde_json::to_string_pretty(&state)
            .context("Impossible de sérialiser l'état")?;
        fs::write(path, content).context("Impossible d'écrire le fichier d'état")?;

        self.dirty = false;
        Ok(())
    }

    /// Charge l'état persistant depuis le fichier donné
    pub fn load(path: &str) -> Result<SavedState> {
        if !Path::new(path).exists() {
            info!("Aucun fichier d'état, démarrage avec un état vierge");
            return Ok(SavedState::default());
        }

        let content =
            fs::read_to_string(path).context("Impossible de lire le fichier d'état")?;
        serde_json::from_str(&content).context("Impossible de désérialiser l'état")
    }

    fn send_report(&self, report: Report) {
        // Utiliser try_send pour éviter de bloquer dans un contexte non-async
        if let Err(e) = self.report_tx.try_send(report) {
            warn!("Échec de l'envoi du rapport: {}", e);
        }
    }
}
