//! The pull-apply-drain state machine.

use crate::config::SyncConfig;
use crate::env::Environment;
use crate::error::{SyncError, SyncResult};
use crate::state::{ContainerReport, ContainerSelector, SyncOutcome, SyncPhase, SyncReport, SyncStatus};
use mailsync_protocol::{
    classify_mutation, classify_pull, mutation_request, pull_request, DeltaOp, HostMessage,
    PullResponse, RealtimeEvent, ResponseClass,
};
use mailsync_store::{ContainerId, Mutation, MutationDraft, SyncCursor};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Cycle,
    DrainOnly,
}

type ReportRx = watch::Receiver<Option<ContainerReport>>;

struct InFlight {
    kind: RunKind,
    done: ReportRx,
}

#[derive(Default)]
struct Slot {
    phase: SyncPhase,
    in_flight: Option<InFlight>,
    cancelled: bool,
    consecutive_failures: u32,
    backoff_until_ms: Option<u64>,
    last_synced_at_ms: Option<u64>,
    last_error: Option<String>,
}

enum Claim {
    Run(watch::Sender<Option<ContainerReport>>),
    Join(ReportRx),
    WaitThenRetry(ReportRx),
    Skip(ContainerReport),
}

struct Shared<E> {
    env: E,
    config: SyncConfig,
    slots: Mutex<HashMap<ContainerId, Slot>>,
    paused: AtomicBool,
}

/// Clears a container's in-flight slot if its run is dropped midway.
struct RunGuard<'a, E> {
    shared: &'a Shared<E>,
    container: &'a ContainerId,
    armed: bool,
}

impl<E> Drop for RunGuard<'_, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.shared.slots.lock();
        if let Some(slot) = slots.get_mut(self.container) {
            slot.in_flight = None;
            slot.cancelled = false;
            if slot.phase.is_active() {
                slot.phase = SyncPhase::Idle;
            }
        }
        warn!(container = %self.container, "sync run dropped before completion");
    }
}

/// Offline sync engine for one account.
///
/// Each container runs at most one cycle at a time. A cycle pulls remote
/// pages, applying each page and its cursor in one store transaction, then
/// replays queued mutations in sequence order. Concurrent requests for the
/// same container join the running cycle; different containers sync
/// independently.
pub struct SyncEngine<E> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for SyncEngine<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E> std::fmt::Debug for SyncEngine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.shared.config)
            .field("paused", &self.shared.paused.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<E: Environment + 'static> SyncEngine<E> {
    /// Creates an engine over an environment.
    pub fn new(env: E, config: SyncConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                env,
                config,
                slots: Mutex::new(HashMap::new()),
                paused: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the environment.
    pub fn env(&self) -> &E {
        &self.shared.env
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Runs one pull-apply-drain cycle for each selected container.
    pub async fn start_sync(&self, selector: ContainerSelector) -> SyncReport {
        self.run_selected(selector, RunKind::Cycle).await
    }

    /// Runs one cycle for a single container.
    pub async fn sync_container(&self, container: &ContainerId) -> ContainerReport {
        self.run(container.clone(), RunKind::Cycle).await
    }

    /// Replays queued mutations without pulling.
    ///
    /// Joins a running cycle for the same container instead of starting a
    /// second replay.
    pub async fn drain_mutations(&self, selector: ContainerSelector) -> SyncReport {
        self.run_selected(selector, RunKind::DrainOnly).await
    }

    /// Seals and queues a local change for replay.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::QueueFull`] at the queue bound,
    /// [`SyncError::Paused`] while the store awaits recovery, or a crypto
    /// error if the key is locked.
    pub fn enqueue(&self, draft: MutationDraft) -> SyncResult<u64> {
        if self.is_paused() {
            return Err(SyncError::Paused);
        }
        let draft = if draft.enqueued_at_ms == 0 {
            draft.with_enqueued_at(self.env().now_ms())
        } else {
            draft
        };
        let target = draft.target.clone();
        match self.env().store().enqueue(draft) {
            Ok(seq) => {
                debug!(container = %target.container, id = %target.id, seq, "mutation queued");
                Ok(seq)
            }
            Err(err) => Err(self.observe(err.into())),
        }
    }

    /// Asks a running cycle to stop at its next checkpoint.
    ///
    /// Returns false if nothing was running for the container.
    pub fn cancel_sync(&self, container: &ContainerId) -> bool {
        let mut slots = self.shared.slots.lock();
        match slots.get_mut(container) {
            Some(slot) if slot.in_flight.is_some() => {
                slot.cancelled = true;
                info!(container = %container, "sync cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Returns the sync state of a container.
    pub fn sync_status(&self, container: &ContainerId) -> SyncStatus {
        let store = self.env().store().store();
        let now = self.env().now_ms();
        let mut status = SyncStatus {
            container: container.clone(),
            phase: SyncPhase::Idle,
            pending_mutations: store.mutations_for(container).len(),
            dead_letters: store.dead_letters_for(container).len(),
            cursor: store.cursor(container).map(|c| c.token),
            last_synced_at_ms: None,
            last_error: None,
            consecutive_failures: 0,
            backoff_until_ms: None,
            paused: self.is_paused(),
        };

        let slots = self.shared.slots.lock();
        if let Some(slot) = slots.get(container) {
            let backing_off = slot.backoff_until_ms.is_some_and(|until| now < until);
            status.phase = match slot.phase {
                SyncPhase::Error if !backing_off && !status.paused => SyncPhase::Idle,
                phase => phase,
            };
            status.last_synced_at_ms = slot.last_synced_at_ms;
            status.last_error = slot.last_error.clone();
            status.consecutive_failures = slot.consecutive_failures;
            status.backoff_until_ms = slot.backoff_until_ms.filter(|_| backing_off);
        }
        status
    }

    /// Handles a realtime change notification by syncing its container.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the event names no valid container.
    pub async fn notify_remote_change(&self, event: &RealtimeEvent) -> SyncResult<ContainerReport> {
        let container = event.container_id()?;
        debug!(container = %container, entity = ?event.entity_id, "remote change notified");
        Ok(self.run(container, RunKind::Cycle).await)
    }

    /// Ends the failure backoff of the selected containers.
    pub fn clear_backoff(&self, selector: &ContainerSelector) {
        let containers = self.resolve(selector);
        let mut slots = self.shared.slots.lock();
        for container in containers {
            if let Some(slot) = slots.get_mut(&container) {
                slot.backoff_until_ms = None;
                slot.consecutive_failures = 0;
                if slot.phase == SyncPhase::Error {
                    slot.phase = SyncPhase::Idle;
                }
            }
        }
    }

    /// Returns true while the engine refuses to run after store corruption.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Resumes syncing after the store was recovered.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StorageCorrupt`] if the store still reports
    /// corruption.
    pub fn resume(&self) -> SyncResult<()> {
        if let Some(corruption) = self.env().store().store().corruption() {
            return Err(SyncError::StorageCorrupt(corruption.to_string()));
        }
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            info!("sync resumed");
        }
        let mut slots = self.shared.slots.lock();
        for slot in slots.values_mut() {
            if slot.phase == SyncPhase::Error {
                slot.phase = SyncPhase::Idle;
            }
        }
        Ok(())
    }

    /// Lists the containers a selector covers, without duplicates.
    pub fn resolve(&self, selector: &ContainerSelector) -> Vec<ContainerId> {
        match selector {
            ContainerSelector::One(container) => vec![container.clone()],
            ContainerSelector::Many(containers) => {
                let mut seen = HashSet::new();
                containers
                    .iter()
                    .filter(|c| seen.insert((*c).clone()))
                    .cloned()
                    .collect()
            }
            ContainerSelector::All => {
                let mut all: BTreeSet<ContainerId> = self.env().store().store().containers().into_iter().collect();
                all.extend(self.config().containers.iter().cloned());
                all.into_iter().collect()
            }
        }
    }

    // --- scheduling ---

    async fn run_selected(&self, selector: ContainerSelector, kind: RunKind) -> SyncReport {
        let containers = self.resolve(&selector);
        if let [container] = containers.as_slice() {
            return SyncReport {
                containers: vec![self.run(container.clone(), kind).await],
            };
        }

        let mut tasks = JoinSet::new();
        for (index, container) in containers.iter().cloned().enumerate() {
            let engine = self.clone();
            tasks.spawn(async move { (index, engine.run(container, kind).await) });
        }

        let mut reports: Vec<Option<ContainerReport>> = vec![None; containers.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => reports[index] = Some(report),
                Err(err) => error!(error = %err, "sync task failed"),
            }
        }

        SyncReport {
            containers: containers
                .into_iter()
                .zip(reports)
                .map(|(container, report)| {
                    report.unwrap_or_else(|| {
                        ContainerReport::new(container).with_outcome(SyncOutcome::Failed {
                            error: "sync task aborted".into(),
                        })
                    })
                })
                .collect(),
        }
    }

    async fn run(&self, container: ContainerId, kind: RunKind) -> ContainerReport {
        loop {
            match self.claim(&container, kind) {
                Claim::Skip(report) => return report,
                Claim::Join(done) => {
                    debug!(container = %container, "joining running sync");
                    let mut report = wait_for_report(done, &container).await;
                    report.coalesced = true;
                    return report;
                }
                Claim::WaitThenRetry(done) => {
                    wait_for_report(done, &container).await;
                }
                Claim::Run(done) => {
                    let mut guard = RunGuard {
                        shared: self.shared.as_ref(),
                        container: &container,
                        armed: true,
                    };
                    let report = self.execute(&container, kind).await;
                    guard.armed = false;
                    done.send_replace(Some(report.clone()));
                    return report;
                }
            }
        }
    }

    fn claim(&self, container: &ContainerId, kind: RunKind) -> Claim {
        let now = self.env().now_ms();
        let mut slots = self.shared.slots.lock();
        let slot = slots.entry(container.clone()).or_default();

        if let Some(flight) = &slot.in_flight {
            let done = flight.done.clone();
            return if flight.kind == RunKind::Cycle || kind == RunKind::DrainOnly {
                Claim::Join(done)
            } else {
                Claim::WaitThenRetry(done)
            };
        }

        let report = ContainerReport::new(container.clone());
        if self.is_paused() {
            return Claim::Skip(report.with_outcome(SyncOutcome::Paused));
        }
        if let Some(until_ms) = slot.backoff_until_ms.filter(|until| now < *until) {
            debug!(container = %container, until_ms, "sync deferred by backoff");
            return Claim::Skip(report.with_outcome(SyncOutcome::Deferred { until_ms }));
        }

        let (done, rx) = watch::channel(None);
        slot.in_flight = Some(InFlight { kind, done: rx });
        slot.cancelled = false;
        Claim::Run(done)
    }

    async fn execute(&self, container: &ContainerId, kind: RunKind) -> ContainerReport {
        let mut report = ContainerReport::new(container.clone());
        self.env().emit(HostMessage::sync_started(container));
        info!(container = %container, ?kind, "sync started");

        let result = match kind {
            RunKind::Cycle => self.cycle(container, &mut report).await,
            RunKind::DrainOnly => self.drain(container, &mut report).await,
        };

        let message = self.settle(container, result, &mut report);
        self.env().emit(message);
        report
    }

    /// Records a finished run in the slot and frees it.
    fn settle(
        &self,
        container: &ContainerId,
        result: SyncResult<()>,
        report: &mut ContainerReport,
    ) -> HostMessage {
        let now = self.env().now_ms();
        let first_to_pause = matches!(&result, Err(err) if err.is_corruption())
            && !self.shared.paused.swap(true, Ordering::SeqCst);

        let mut slots = self.shared.slots.lock();
        let slot = slots.entry(container.clone()).or_default();
        slot.in_flight = None;
        slot.cancelled = false;

        match result {
            Ok(()) => {
                slot.phase = SyncPhase::Idle;
                slot.consecutive_failures = 0;
                slot.backoff_until_ms = None;
                slot.last_synced_at_ms = Some(now);
                slot.last_error = None;
                report.outcome = SyncOutcome::Completed;
                info!(container = %container, pulled = report.pulled, replayed = report.replayed, "sync completed");
                HostMessage::sync_completed(container, report.summary())
            }
            Err(SyncError::Cancelled) => {
                slot.phase = SyncPhase::Idle;
                report.outcome = SyncOutcome::Cancelled;
                info!(container = %container, "sync cancelled");
                HostMessage::sync_failed(container, "cancelled")
            }
            Err(err) if err.is_corruption() => {
                slot.phase = SyncPhase::Error;
                slot.last_error = Some(err.to_string());
                report.outcome = SyncOutcome::Failed {
                    error: err.to_string(),
                };
                if first_to_pause {
                    error!(container = %container, error = %err, "store corrupt, sync paused");
                    HostMessage::db_error(err.to_string())
                } else {
                    HostMessage::sync_failed(container, err.to_string())
                }
            }
            Err(err) => {
                slot.consecutive_failures = slot.consecutive_failures.saturating_add(1);
                let delay = self.config().retry.delay_for_attempt(slot.consecutive_failures);
                let until_ms = now.saturating_add(duration_ms(delay));
                slot.phase = SyncPhase::Error;
                slot.backoff_until_ms = Some(until_ms);
                slot.last_error = Some(err.to_string());
                report.outcome = SyncOutcome::Failed {
                    error: err.to_string(),
                };
                warn!(
                    container = %container,
                    error = %err,
                    failures = slot.consecutive_failures,
                    until_ms,
                    "sync failed"
                );
                HostMessage::sync_failed(container, err.to_string())
            }
        }
    }

    fn set_phase(&self, container: &ContainerId, phase: SyncPhase) {
        let mut slots = self.shared.slots.lock();
        slots.entry(container.clone()).or_default().phase = phase;
    }

    fn check_cancelled(&self, container: &ContainerId) -> SyncResult<()> {
        let slots = self.shared.slots.lock();
        if slots.get(container).is_some_and(|slot| slot.cancelled) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Pauses the engine if `err` reports corruption.
    fn observe(&self, err: SyncError) -> SyncError {
        if err.is_corruption() && !self.shared.paused.swap(true, Ordering::SeqCst) {
            error!(error = %err, "store corrupt, sync paused");
            self.env().emit(HostMessage::db_error(err.to_string()));
        }
        err
    }

    // --- cycle ---

    async fn cycle(&self, container: &ContainerId, report: &mut ContainerReport) -> SyncResult<()> {
        self.check_cancelled(container)?;
        self.pull(container, report).await?;
        self.check_cancelled(container)?;
        self.drain(container, report).await
    }

    async fn pull(&self, container: &ContainerId, report: &mut ContainerReport) -> SyncResult<()> {
        let mut cursor = self.env().store().store().cursor(container).map(|c| c.token);
        let mut refetched = false;
        let mut pages = 0u32;

        loop {
            self.check_cancelled(container)?;
            self.set_phase(container, SyncPhase::Pulling);

            let request = pull_request(container, cursor.as_deref(), self.config().pull_limit);
            let response = self.env().fetch(request).await?;
            self.check_cancelled(container)?;

            match classify_pull(response.status) {
                ResponseClass::Success => {}
                ResponseClass::CursorExpired => {
                    if refetched {
                        return Err(SyncError::ServerRejected {
                            status: response.status,
                            message: "cursor expired again after a full refetch".into(),
                        });
                    }
                    warn!(container = %container, "cursor expired, refetching container");
                    self.env().store().transaction(|txn| {
                        txn.clear_container(container);
                        Ok::<_, SyncError>(())
                    })?;
                    cursor = None;
                    refetched = true;
                    continue;
                }
                ResponseClass::Retryable => {
                    return Err(SyncError::ServerUnavailable {
                        status: response.status,
                    })
                }
                ResponseClass::Terminal => {
                    return Err(SyncError::ServerRejected {
                        status: response.status,
                        message: response.body_excerpt(),
                    })
                }
            }

            let page = PullResponse::from_json(&response.body)?;
            let has_more = page.has_more;
            let next_cursor = page.next_cursor.clone();

            self.set_phase(container, SyncPhase::Applying);
            report.pulled += self.apply_page(container, page)?;
            cursor = Some(next_cursor);

            pages += 1;
            if !has_more {
                break;
            }
            if pages >= self.config().max_pull_pages {
                debug!(container = %container, pages, "page limit reached, resuming next cycle");
                break;
            }
        }
        Ok(())
    }

    /// Writes a page and its cursor in one transaction.
    fn apply_page(&self, container: &ContainerId, page: PullResponse) -> SyncResult<usize> {
        let now = self.env().now_ms();
        let pending: HashSet<String> = self
            .env()
            .store()
            .store()
            .mutations_for(container)
            .into_iter()
            .map(|m| m.target.id)
            .collect();

        let PullResponse {
            deltas, next_cursor, ..
        } = page;
        let applied = deltas.len();

        self.env().store().transaction(|txn| {
            for delta in deltas {
                if pending.contains(&delta.id) {
                    debug!(container = %container, id = %delta.id, op = ?delta.op, "remote change overrides pending local mutation");
                }
                match delta.op {
                    DeltaOp::Upsert => txn.put(delta.into_entity(container)?)?,
                    DeltaOp::Delete => txn.delete(container, &delta.id),
                }
            }
            txn.set_cursor(SyncCursor {
                container: container.clone(),
                token: next_cursor,
                updated_at_ms: now,
            });
            Ok::<_, SyncError>(())
        })?;

        debug!(container = %container, applied, "page applied");
        Ok(applied)
    }

    // --- replay ---

    async fn drain(&self, container: &ContainerId, report: &mut ContainerReport) -> SyncResult<()> {
        self.set_phase(container, SyncPhase::Draining);
        let queued = self.env().store().store().mutations_for(container);
        let mut blocked: HashSet<String> = HashSet::new();

        for mutation in queued {
            self.check_cancelled(container)?;
            if blocked.contains(&mutation.target.id) {
                report.held_back += 1;
                continue;
            }
            if !mutation.is_due(self.env().now_ms()) {
                blocked.insert(mutation.target.id.clone());
                report.held_back += 1;
                continue;
            }
            if self.env().store().store().mutation(mutation.seq).is_none() {
                continue;
            }
            self.replay(container, mutation, &mut blocked, report).await?;
        }
        Ok(())
    }

    async fn replay(
        &self,
        container: &ContainerId,
        mutation: Mutation,
        blocked: &mut HashSet<String>,
        report: &mut ContainerReport,
    ) -> SyncResult<()> {
        let seq = mutation.seq;
        let opened = match self.env().store().open_mutation(mutation.clone()) {
            Ok(opened) => opened,
            Err(err) if err.is_record_fatal() => {
                error!(container = %container, seq, "queued mutation failed authentication");
                return self.dead_letter(container, mutation, "payload failed authentication".into(), report);
            }
            Err(err) => return Err(err.into()),
        };

        debug!(
            container = %container,
            seq,
            kind = mutation.kind.name(),
            attempt = mutation.retry_count + 1,
            "replaying mutation"
        );
        let result = self.env().fetch(mutation_request(&opened)).await;
        self.check_cancelled(container)?;

        let failure = match result {
            Ok(response) => match classify_mutation(&mutation.kind, response.status) {
                ResponseClass::Success => {
                    self.env().store().transaction(|txn| {
                        txn.dequeue(seq)?;
                        Ok::<_, SyncError>(())
                    })?;
                    report.replayed += 1;
                    debug!(container = %container, seq, status = response.status, "mutation confirmed");
                    return Ok(());
                }
                ResponseClass::Terminal => {
                    let rejected = SyncError::ServerRejected {
                        status: response.status,
                        message: response.body_excerpt(),
                    };
                    return self.dead_letter(container, mutation, rejected.to_string(), report);
                }
                ResponseClass::Retryable | ResponseClass::CursorExpired => SyncError::ServerUnavailable {
                    status: response.status,
                },
            },
            Err(err) => err.into(),
        };

        self.reschedule(container, mutation, failure, blocked, report)
    }

    fn reschedule(
        &self,
        container: &ContainerId,
        mut mutation: Mutation,
        failure: SyncError,
        blocked: &mut HashSet<String>,
        report: &mut ContainerReport,
    ) -> SyncResult<()> {
        let retry = &self.config().retry;
        mutation.retry_count = mutation.retry_count.saturating_add(1);

        if retry.is_exhausted(mutation.retry_count) {
            let reason = format!("gave up after {} attempts: {failure}", mutation.retry_count);
            return self.dead_letter(container, mutation, reason, report);
        }

        let delay_ms = duration_ms(retry.delay_for_attempt(mutation.retry_count));
        mutation.next_retry_at_ms = self.env().now_ms().saturating_add(delay_ms);
        mutation.last_error = Some(failure.to_string());
        blocked.insert(mutation.target.id.clone());

        warn!(
            container = %container,
            seq = mutation.seq,
            attempt = mutation.retry_count,
            delay_ms,
            error = %failure,
            "mutation replay failed, will retry"
        );
        self.env().store().transaction(|txn| {
            txn.update_mutation(mutation)?;
            Ok::<_, SyncError>(())
        })?;
        report.retried += 1;
        Ok(())
    }

    fn dead_letter(
        &self,
        container: &ContainerId,
        mut mutation: Mutation,
        reason: String,
        report: &mut ContainerReport,
    ) -> SyncResult<()> {
        let now = self.env().now_ms();
        let seq = mutation.seq;
        let detail = format!("{} {} (seq {seq}): {reason}", mutation.kind.name(), mutation.target.id);
        mutation.last_error = Some(reason.clone());

        self.env().store().transaction(|txn| {
            txn.update_mutation(mutation)?;
            txn.dead_letter(seq, &reason, now)?;
            Ok::<_, SyncError>(())
        })?;

        warn!(container = %container, seq, reason = %reason, "mutation dead-lettered");
        report.dead_lettered += 1;
        self.env().emit(HostMessage::mutation_failed(container, detail));
        Ok(())
    }
}

async fn wait_for_report(mut done: ReportRx, container: &ContainerId) -> ContainerReport {
    let report = done.wait_for(Option::is_some).await.map(|r| (*r).clone());
    match report {
        Ok(Some(report)) => report,
        _ => ContainerReport::new(container.clone()).with_outcome(SyncOutcome::Cancelled),
    }
}

fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FetchError;
    use async_trait::async_trait;
    use mailsync_crypto::SecureStore;
    use mailsync_protocol::{ApiRequest, ApiResponse, HostMessageKind, Method, RemoteDelta};
    use mailsync_store::{DurableStore, EntityKey, EntityKind, MutationKind};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU64;

    type Responder = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, FetchError> + Send + Sync>;

    struct MockEnv {
        store: SecureStore,
        clock: AtomicU64,
        queued: parking_lot::Mutex<VecDeque<Result<ApiResponse, FetchError>>>,
        fallback: Responder,
        requests: parking_lot::Mutex<Vec<ApiRequest>>,
        messages: parking_lot::Mutex<Vec<HostMessage>>,
    }

    impl MockEnv {
        fn new(fallback: Responder) -> Self {
            Self {
                store: SecureStore::passthrough(Arc::new(DurableStore::open_in_memory().unwrap())),
                clock: AtomicU64::new(1_000),
                queued: parking_lot::Mutex::new(VecDeque::new()),
                fallback,
                requests: parking_lot::Mutex::new(Vec::new()),
                messages: parking_lot::Mutex::new(Vec::new()),
            }
        }

        fn ok() -> Self {
            Self::new(Box::new(|request| Ok(default_response(request))))
        }

        fn push(&self, response: Result<ApiResponse, FetchError>) {
            self.queued.lock().push_back(response);
        }

        fn kinds(&self) -> Vec<HostMessageKind> {
            self.messages.lock().iter().map(|m| m.kind).collect()
        }
    }

    fn default_response(request: &ApiRequest) -> ApiResponse {
        if request.method == Method::Get {
            let page = PullResponse {
                deltas: Vec::new(),
                next_cursor: "c1".into(),
                has_more: false,
            };
            ApiResponse::new(200, page.to_json().unwrap())
        } else {
            ApiResponse::new(200, b"{}".to_vec())
        }
    }

    #[async_trait]
    impl Environment for MockEnv {
        async fn fetch(&self, request: ApiRequest) -> Result<ApiResponse, FetchError> {
            tokio::task::yield_now().await;
            self.requests.lock().push(request.clone());
            let queued = self.queued.lock().pop_front();
            queued.unwrap_or_else(|| (self.fallback)(&request))
        }

        fn store(&self) -> &SecureStore {
            &self.store
        }

        fn emit(&self, message: HostMessage) {
            self.messages.lock().push(message);
        }

        fn now_ms(&self) -> u64 {
            self.clock.load(Ordering::SeqCst)
        }
    }

    fn inbox() -> ContainerId {
        ContainerId::new(EntityKind::Message, "INBOX")
    }

    fn update(id: &str) -> MutationDraft {
        MutationDraft::new(
            MutationKind::Update,
            EntityKey::new(inbox(), id),
            br#"{"read":true}"#.to_vec(),
        )
    }

    fn page(deltas: Vec<RemoteDelta>, cursor: &str, has_more: bool) -> ApiResponse {
        let page = PullResponse {
            deltas,
            next_cursor: cursor.into(),
            has_more,
        };
        ApiResponse::new(200, page.to_json().unwrap())
    }

    fn engine(env: MockEnv) -> SyncEngine<MockEnv> {
        SyncEngine::new(env, SyncConfig::new().with_container(inbox()))
    }

    #[tokio::test]
    async fn cycle_pulls_then_drains() {
        let env = MockEnv::ok();
        env.push(Ok(page(
            vec![RemoteDelta::upsert("m1", "v1", serde_json::json!({"subject": "hi"}))],
            "c1",
            false,
        )));
        let engine = engine(env);
        engine.enqueue(update("m1")).unwrap();

        let report = engine.sync_container(&inbox()).await;
        assert!(report.is_completed());
        assert_eq!(report.pulled, 1);
        assert_eq!(report.replayed, 1);

        let store = engine.env().store().store();
        assert!(store.get(&inbox(), "m1").is_some());
        assert_eq!(store.cursor(&inbox()).unwrap().token, "c1");
        assert!(store.list_mutations().is_empty());

        let requests = engine.env().requests.lock();
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(requests[1].method, Method::Put);
        assert_eq!(
            engine.env().kinds(),
            vec![HostMessageKind::SyncStarted, HostMessageKind::SyncCompleted]
        );
    }

    #[tokio::test]
    async fn pages_follow_has_more() {
        let env = MockEnv::ok();
        env.push(Ok(page(vec![RemoteDelta::upsert("a", "1", serde_json::json!({}))], "p1", true)));
        env.push(Ok(page(vec![RemoteDelta::upsert("b", "1", serde_json::json!({}))], "p2", false)));
        let engine = engine(env);

        let report = engine.sync_container(&inbox()).await;
        assert_eq!(report.pulled, 2);

        let requests = engine.env().requests.lock();
        assert!(requests[1].path.contains("cursor=p1"));
        assert_eq!(engine.env().store().store().cursor(&inbox()).unwrap().token, "p2");
    }

    #[tokio::test]
    async fn pulled_delete_removes_entity() {
        let env = MockEnv::ok();
        env.push(Ok(page(vec![RemoteDelta::upsert("a", "1", serde_json::json!({}))], "p1", false)));
        env.push(Ok(page(vec![RemoteDelta::delete("a")], "p2", false)));
        let engine = engine(env);

        engine.sync_container(&inbox()).await;
        assert!(engine.env().store().store().get(&inbox(), "a").is_some());
        engine.sync_container(&inbox()).await;
        assert!(engine.env().store().store().get(&inbox(), "a").is_none());
    }

    #[tokio::test]
    async fn expired_cursor_clears_and_refetches() {
        let env = MockEnv::ok();
        env.push(Ok(page(vec![RemoteDelta::upsert("old", "1", serde_json::json!({}))], "p1", false)));
        let engine = engine(env);
        engine.sync_container(&inbox()).await;

        engine.env().push(Ok(ApiResponse::new(410, Vec::new())));
        engine
            .env()
            .push(Ok(page(vec![RemoteDelta::upsert("new", "1", serde_json::json!({}))], "fresh", false)));
        let report = engine.sync_container(&inbox()).await;
        assert!(report.is_completed());

        let store = engine.env().store().store();
        assert!(store.get(&inbox(), "old").is_none());
        assert!(store.get(&inbox(), "new").is_some());
        assert_eq!(store.cursor(&inbox()).unwrap().token, "fresh");

        let requests = engine.env().requests.lock();
        assert!(!requests.last().unwrap().path.contains("cursor="));
    }

    #[tokio::test]
    async fn failed_pull_backs_off() {
        let env = MockEnv::ok();
        env.push(Ok(ApiResponse::new(503, Vec::new())));
        let engine = engine(env);

        let report = engine.sync_container(&inbox()).await;
        assert!(matches!(report.outcome, SyncOutcome::Failed { .. }));

        let status = engine.sync_status(&inbox());
        assert_eq!(status.phase, SyncPhase::Error);
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.backoff_until_ms.is_some());

        let deferred = engine.sync_container(&inbox()).await;
        assert!(matches!(deferred.outcome, SyncOutcome::Deferred { .. }));
        assert_eq!(engine.env().requests.lock().len(), 1);

        engine.clear_backoff(&ContainerSelector::One(inbox()));
        assert!(engine.sync_container(&inbox()).await.is_completed());
        assert_eq!(engine.sync_status(&inbox()).consecutive_failures, 0);
    }

    #[tokio::test]
    async fn retryable_replay_is_rescheduled() {
        let env = MockEnv::ok();
        let engine = engine(env);
        let seq = engine.enqueue(update("m1")).unwrap();
        engine.env().push(Err(FetchError::Network("offline".into())));

        let report = engine.drain_mutations(ContainerSelector::One(inbox())).await;
        let report = report.get(&inbox()).unwrap();
        assert_eq!(report.retried, 1);

        let mutation = engine.env().store().store().mutation(seq).unwrap();
        assert_eq!(mutation.retry_count, 1);
        assert!(mutation.next_retry_at_ms > engine.env().now_ms());
        assert!(mutation.last_error.unwrap().contains("offline"));

        // Not due yet, so the next drain leaves it alone.
        let report = engine.drain_mutations(ContainerSelector::One(inbox())).await;
        assert_eq!(report.get(&inbox()).unwrap().held_back, 1);
        assert_eq!(engine.env().requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn rejected_replay_is_dead_lettered() {
        let env = MockEnv::ok();
        let engine = engine(env);
        let seq = engine.enqueue(update("m1")).unwrap();
        engine.env().push(Ok(ApiResponse::new(422, b"invalid flag".to_vec())));

        let report = engine.drain_mutations(ContainerSelector::One(inbox())).await;
        assert_eq!(report.get(&inbox()).unwrap().dead_lettered, 1);

        let store = engine.env().store().store();
        assert!(store.mutation(seq).is_none());
        let dead = store.list_dead_letters();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].reason.contains("422"));
        assert!(engine.env().kinds().contains(&HostMessageKind::MutationFailed));
    }

    #[tokio::test]
    async fn cancel_without_run_is_noop() {
        let engine = engine(MockEnv::ok());
        assert!(!engine.cancel_sync(&inbox()));
    }

    #[tokio::test]
    async fn all_selector_includes_registered_and_stored() {
        let engine = engine(MockEnv::ok());
        let sent = ContainerId::new(EntityKind::Message, "Sent");
        engine
            .enqueue(MutationDraft::new(
                MutationKind::Create,
                EntityKey::new(sent.clone(), "d1"),
                b"{}".to_vec(),
            ))
            .unwrap();

        let resolved = engine.resolve(&ContainerSelector::All);
        assert!(resolved.contains(&inbox()));
        assert!(resolved.contains(&sent));

        let many = engine.resolve(&ContainerSelector::Many(vec![sent.clone(), sent.clone()]));
        assert_eq!(many, vec![sent]);
    }

    #[tokio::test]
    async fn status_reports_queue_and_cursor() {
        let engine = engine(MockEnv::ok());
        engine.enqueue(update("m1")).unwrap();
        let status = engine.sync_status(&inbox());
        assert_eq!(status.phase, SyncPhase::Idle);
        assert_eq!(status.pending_mutations, 1);
        assert_eq!(status.cursor, None);
        assert!(!status.paused);
    }
}
