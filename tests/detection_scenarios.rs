//! Scénarios de bout en bout du cycle de surveillance
//!
//! La source d'événements et le backend de pare-feu sont remplacés par
//! des doublures en mémoire pour dérouler les cycles sans système.

use async_trait::async_trait;
use smbguard::adapters::{EventSource, MitigationBackend};
use smbguard::config::Config;
use smbguard::engine::SavedState;
use smbguard::log_mode::LogMode;
use smbguard::models::{
    ConnectionEvent, ConnectionState, GuardError, MitigationAction,
};
use smbguard::service::GuardService;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

/// Source scriptée: un lot d'événements par sondage
struct ScriptedSource {
    batches: Mutex<VecDeque<Result<Vec<ConnectionEvent>, ()>>>,
}

impl ScriptedSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(VecDeque::new()),
        })
    }

    fn push_batch(&self, events: Vec<ConnectionEvent>) {
        self.batches.lock().unwrap().push_back(Ok(events));
    }

    fn push_failure(&self) {
        self.batches.lock().unwrap().push_back(Err(()));
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn poll(&self) -> Result<Vec<ConnectionEvent>, GuardError> {
        match self.batches.lock().unwrap().pop_front() {
            Some(Ok(events)) => Ok(events),
            Some(Err(())) => Err(GuardError::AdapterUnavailable(
                "source scriptée en échec".to_string(),
            )),
            None => Ok(Vec::new()),
        }
    }
}

/// Backend enregistreur: mémorise chaque action, échoue sur commande
struct RecordingBackend {
    calls: Mutex<Vec<MitigationAction>>,
    failures: Mutex<HashMap<IpAddr, VecDeque<bool>>>,
}

impl RecordingBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        })
    }

    /// Programme l'issue des prochains appels pour une source (true = échec)
    fn script_failures(&self, source: IpAddr, outcomes: &[bool]) {
        let mut failures = self.failures.lock().unwrap();
        failures
            .entry(source)
            .or_default()
            .extend(outcomes.iter().copied());
    }

    fn calls(&self) -> Vec<MitigationAction> {
        self.calls.lock().unwrap().clone()
    }

    fn block_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|action| matches!(action, MitigationAction::Block(_, _)))
            .count()
    }

    fn unblock_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|action| matches!(action, MitigationAction::Unblock(_)))
            .count()
    }
}

#[async_trait]
impl MitigationBackend for RecordingBackend {
    async fn apply(&self, action: &MitigationAction) -> Result<(), GuardError> {
        self.calls.lock().unwrap().push(*action);
        let fail = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&action.source_ip())
            .and_then(|outcomes| outcomes.pop_front())
            .unwrap_or(false);
        if fail {
            Err(GuardError::BackendApplyFailed {
                action: format!("{}", action),
                detail: "échec scripté".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.state_file = dir
        .path()
        .join("state.json")
        .to_str()
        .unwrap()
        .to_string();
    config.log_file = dir.path().join("smbguard.log").to_str().unwrap().to_string();
    config.log_mode = LogMode::File;
    config.service_state = smbguard::config::ServiceState::Active;
    config.tick_timeout_secs = 2;
    config
}

fn ip(last: u8) -> IpAddr {
    format!("10.0.0.{}", last).parse().unwrap()
}

fn event(source: IpAddr, age: Duration) -> ConnectionEvent {
    ConnectionEvent {
        source_ip: source,
        timestamp: SystemTime::now() - age,
        target_port: 445,
        state: ConnectionState::Established,
    }
}

fn burst(source: IpAddr, count: usize) -> Vec<ConnectionEvent> {
    (0..count)
        .map(|i| event(source, Duration::from_secs(i as u64 * 10)))
        .collect()
}

async fn service_with(
    config: Config,
    source: Arc<ScriptedSource>,
    backend: Arc<RecordingBackend>,
) -> GuardService {
    GuardService::new(Arc::new(RwLock::new(config)), source, backend).await
}

#[tokio::test]
async fn test_burst_triggers_block_at_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let backend = RecordingBackend::new();

    // 5 connexions aux décalages 0s, 10s, 20s, 30s, 40s: toutes dans la
    // fenêtre de 60s, le seuil de 5 est atteint
    source.push_batch(burst(ip(5), 5));

    let mut service = service_with(test_config(&dir), source, backend.clone()).await;
    service.tick().await;

    assert_eq!(backend.block_calls(), 1);
    assert!(service.engine().is_blocked(ip(5)));
    match backend.calls()[0] {
        MitigationAction::Block(blocked, duration) => {
            assert_eq!(blocked, ip(5));
            assert_eq!(duration, Duration::from_secs(1800));
        }
        _ => panic!("un blocage était attendu"),
    }
}

#[tokio::test]
async fn test_spread_connections_never_block() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let backend = RecordingBackend::new();

    // 4 connexions anciennes (hors fenêtre) et 4 récentes: jamais 5
    // dans une même fenêtre de 60s
    let mut events: Vec<ConnectionEvent> = (0..4)
        .map(|_| event(ip(5), Duration::from_secs(70)))
        .collect();
    events.extend((0..4).map(|_| event(ip(5), Duration::from_secs(0))));
    source.push_batch(events);

    let mut service = service_with(test_config(&dir), source, backend.clone()).await;
    service.tick().await;

    assert_eq!(backend.block_calls(), 0);
    assert!(!service.engine().is_blocked(ip(5)));
}

#[tokio::test]
async fn test_threshold_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let backend = RecordingBackend::new();

    // THRESHOLD - 1 connexions: pas de blocage
    source.push_batch(burst(ip(5), 4));
    let mut service = service_with(test_config(&dir), source.clone(), backend.clone()).await;
    service.tick().await;
    assert_eq!(backend.block_calls(), 0);

    // Une connexion de plus dans la même fenêtre: exactement THRESHOLD
    source.push_batch(burst(ip(5), 1));
    service.tick().await;
    assert_eq!(backend.block_calls(), 1);
    assert!(service.engine().is_blocked(ip(5)));
}

#[tokio::test]
async fn test_no_duplicate_block_while_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let backend = RecordingBackend::new();

    source.push_batch(burst(ip(5), 5));
    let mut service = service_with(test_config(&dir), source.clone(), backend.clone()).await;
    service.tick().await;
    assert_eq!(backend.block_calls(), 1);

    // La source continue de marteler le port pendant son blocage: aucune
    // nouvelle intention
    source.push_batch(burst(ip(5), 5));
    service.tick().await;
    source.push_batch(burst(ip(5), 5));
    service.tick().await;

    assert_eq!(backend.block_calls(), 1);
}

#[tokio::test]
async fn test_backend_fails_twice_then_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let backend = RecordingBackend::new();

    // Deux échecs puis un succès, avec max_backend_retries = 3
    backend.script_failures(ip(5), &[true, true, false]);
    source.push_batch(burst(ip(5), 5));

    let mut service = service_with(test_config(&dir), source, backend.clone()).await;
    service.tick().await;

    // Exactement 3 appels observés, blocage finalement enregistré
    assert_eq!(backend.block_calls(), 3);
    assert!(service.engine().is_blocked(ip(5)));
}

#[tokio::test]
async fn test_exhausted_block_retried_next_tick() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let backend = RecordingBackend::new();

    // Toutes les tentatives du premier cycle échouent: pas de blocage
    backend.script_failures(ip(5), &[true, true, true]);
    source.push_batch(burst(ip(5), 5));

    let mut service = service_with(test_config(&dir), source.clone(), backend.clone()).await;
    service.tick().await;
    assert_eq!(backend.block_calls(), 3);
    assert!(!service.engine().is_blocked(ip(5)));

    // La source reste suspecte: le cycle suivant retente et réussit
    source.push_batch(burst(ip(5), 5));
    service.tick().await;
    assert!(service.engine().is_blocked(ip(5)));
}

#[tokio::test]
async fn test_block_expires_after_ban_duration() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let backend = RecordingBackend::new();

    let mut config = test_config(&dir);
    config.ban_duration_secs = 1;

    source.push_batch(burst(ip(5), 5));
    let mut service = service_with(config, source, backend.clone()).await;
    service.tick().await;
    assert!(service.engine().is_blocked(ip(5)));

    // Avant l'expiration: aucun déblocage
    service.tick().await;
    assert_eq!(backend.unblock_calls(), 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    // Premier cycle après l'expiration: exactement un déblocage
    service.tick().await;
    assert_eq!(backend.unblock_calls(), 1);
    assert!(!service.engine().is_blocked(ip(5)));

    // Et plus aucun ensuite
    service.tick().await;
    assert_eq!(backend.unblock_calls(), 1);
}

#[tokio::test]
async fn test_failed_unblock_retried_on_next_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let backend = RecordingBackend::new();

    let mut config = test_config(&dir);
    config.ban_duration_secs = 1;

    source.push_batch(burst(ip(5), 5));
    let mut service = service_with(config, source, backend.clone()).await;
    service.tick().await;
    assert!(service.engine().is_blocked(ip(5)));

    tokio::time::sleep(Duration::from_millis(1100)).await;

    // Le déblocage échoue: le blocage est conservé plutôt que de laisser
    // filtrer la source par un déblocage silencieux
    backend.script_failures(ip(5), &[true]);
    service.tick().await;
    assert_eq!(backend.unblock_calls(), 1);
    assert!(service.engine().is_blocked(ip(5)));

    // Le balayage suivant retente et réussit
    service.tick().await;
    assert_eq!(backend.unblock_calls(), 2);
    assert!(!service.engine().is_blocked(ip(5)));
}

#[tokio::test]
async fn test_restart_reapplies_pending_block() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let backend = RecordingBackend::new();
    let config = test_config(&dir);

    // Arrêt brutal au milieu d'un cycle: l'intention de blocage a été
    // journalisée mais son résultat est inconnu
    let state = SavedState {
        records: Vec::new(),
        pending: vec![MitigationAction::Block(ip(5), Duration::from_secs(1800))],
    };
    std::fs::write(
        &config.state_file,
        serde_json::to_string_pretty(&state).unwrap(),
    )
    .unwrap();

    let mut service = service_with(config, source, backend.clone()).await;
    service.restore_state().await;

    // Au redémarrage la source est re-bloquée, jamais oubliée en silence
    assert_eq!(backend.block_calls(), 1);
    assert!(service.engine().is_blocked(ip(5)));
}

#[tokio::test]
async fn test_restart_restores_active_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let backend = RecordingBackend::new();
    let config = test_config(&dir);

    let now = SystemTime::now();
    let state = SavedState {
        records: vec![smbguard::models::BlockRecord::new(
            ip(7),
            now,
            Duration::from_secs(1800),
        )],
        pending: Vec::new(),
    };
    std::fs::write(
        &config.state_file,
        serde_json::to_string_pretty(&state).unwrap(),
    )
    .unwrap();

    let mut service = service_with(config, source, backend.clone()).await;
    service.restore_state().await;

    // Le blocage restauré est connu sans nouvel appel au pare-feu
    assert!(service.engine().is_blocked(ip(7)));
    assert_eq!(backend.block_calls(), 0);
}

#[tokio::test]
async fn test_whitelisted_source_never_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let backend = RecordingBackend::new();

    let localhost: IpAddr = "127.0.0.1".parse().unwrap();
    source.push_batch(burst(localhost, 10));

    let mut service = service_with(test_config(&dir), source, backend.clone()).await;
    service.tick().await;

    assert_eq!(backend.block_calls(), 0);
    assert!(!service.engine().is_blocked(localhost));
    // Les adresses en liste blanche ne sont même pas suivies
    assert_eq!(service.tracker().tracked_sources(), 0);
}

#[tokio::test]
async fn test_unavailable_source_skips_tick() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let backend = RecordingBackend::new();

    source.push_failure();
    source.push_batch(burst(ip(5), 5));

    let mut service = service_with(test_config(&dir), source, backend.clone()).await;

    // Le cycle en échec est sauté sans faire tomber la boucle
    service.tick().await;
    assert_eq!(backend.block_calls(), 0);

    // Le cycle suivant reprend l'ingestion normalement
    service.tick().await;
    assert_eq!(backend.block_calls(), 1);
}

#[tokio::test]
async fn test_failures_isolated_between_sources() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let backend = RecordingBackend::new();

    // Deux sources franchissent le seuil dans le même cycle; toutes les
    // tentatives pour la première source échouent
    backend.script_failures(ip(5), &[true, true, true]);

    let mut events = burst(ip(5), 5);
    events.extend(burst(ip(6), 5));
    source.push_batch(events);

    let mut service = service_with(test_config(&dir), source, backend.clone()).await;
    service.tick().await;

    // L'échec d'une source ne retarde ni n'empêche la mitigation de l'autre
    assert!(!service.engine().is_blocked(ip(5)));
    assert!(service.engine().is_blocked(ip(6)));
}
