//! Traqueur de fenêtres glissantes par adresse source
//!
//! Chaque source conserve les horodatages de ses connexions récentes.
//! L'éviction des entrées expirées est paresseuse (au moment du comptage);
//! la purge des sources inactives est faite par le balayage périodique,
//! jamais sur le chemin chaud.

use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, SystemTime};

pub struct RateWindowTracker {
    windows: DashMap<IpAddr, Vec<SystemTime>>,
}

impl RateWindowTracker {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Enregistre un événement qualifiant pour une source
    ///
    /// Les événements simultanés comptent indépendamment: aucune
    /// déduplication par horodatage.
    pub fn observe(&self, ip: IpAddr, timestamp: SystemTime) {
        self.windows.entry(ip).or_default().push(timestamp);
    }

    /// Compte les événements retenus dans `[now - window, now]` (intervalle
    /// fermé), après éviction des entrées plus anciennes que la fenêtre.
    pub fn count(&self, ip: IpAddr, now: SystemTime, window: Duration) -> usize {
        let cutoff = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);
        match self.windows.get_mut(&ip) {
            Some(mut timestamps) => {
                timestamps.retain(|t| *t >= cutoff);
                timestamps.iter().filter(|t| **t <= now).count()
            }
            None => 0,
        }
    }

    /// Une source est suspecte dès que le seuil est atteint (exactement
    /// `threshold` événements suffisent).
    pub fn is_suspicious(
        &self,
        ip: IpAddr,
        now: SystemTime,
        window: Duration,
        threshold: u32,
    ) -> bool {
        self.count(ip, now, window) >= threshold as usize
    }

    /// Purge les sources sans événement depuis `window + grace`
    ///
    /// Appelé par le balayage périodique pour borner la mémoire; retourne
    /// le nombre de sources supprimées.
    pub fn sweep(&self, now: SystemTime, window: Duration, grace: Duration) -> usize {
        let cutoff = now
            .checked_sub(window + grace)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let before = self.windows.len();
        self.windows
            .retain(|_, timestamps| timestamps.iter().any(|t| *t >= cutoff));
        before - self.windows.len()
    }

    /// Nombre de sources actuellement suivies
    pub fn tracked_sources(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RateWindowTracker {
    fn default() -> Self {
        Self::new()
    }
}
