// src/spooler/mod.rs - The spooler engine and its run loop
//
// Producers call enqueue/cancel/move_job from any task; a single run loop
// owns the device and drives each job through operator confirmation, pause
// recovery and retry. Public mutations are serialized by one op lock so the
// store, the queue and the disk spool stay consistent under concurrency.
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tokio::task;

use crate::device::{PlotOutcome, PlotRequest, PlotterDriver, ResumeMode, ReturnCode};
use crate::doc::{DocError, PlotDoc};
use crate::job::{EventSender, Job, JobEvent, JobParams, JobStatus, PlotStats};
use crate::notify::NotificationBus;
use crate::persist::{SpoolDir, SpoolStatus};
use crate::prompt::{
    Prompt, PromptAction, CONFIRM_CHOICES, IDLE_CHOICES, PAUSED_CHOICES, REPEAT_CHOICES,
    RETRY_CHOICES, SETUP_CHOICES,
};
use crate::queue::{QueueError, ReorderableQueue};
use crate::store::JobStore;

#[derive(Debug, Error)]
pub enum SpoolerError {
    #[error("client {0} already has a job queued")]
    DuplicateJob(String),
    #[error("no job queued for client {0}")]
    UnknownClient(String),
    #[error("job {0} is currently plotting")]
    JobPlotting(String),
    #[error(transparent)]
    Document(#[from] DocError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("device task failed: {0}")]
    Device(String),
}

/// Engine phase, owned exclusively by the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Waiting,
    ConfirmPlot,
    Plotting,
    Paused,
}

/// Read-only snapshot for external observers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub phase: Phase,
    pub job: Option<String>,
    pub queue_size: usize,
}

/// Per-job view row; `position` is 0 for the current job, index + 1 for
/// queued jobs.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub client: String,
    pub status: JobStatus,
    pub position: i64,
    pub hash: String,
    pub time_estimate: f64,
}

/// Engine policy knobs, distilled from the host configuration.
#[derive(Debug, Clone)]
pub struct SpoolerPolicy {
    /// Offer to plot a finished job again before closing it out.
    pub repeat_jobs: bool,
    /// Rebuild the waiting queue from disk when the run loop starts.
    pub resume_on_start: bool,
    pub pen_up_percent: u32,
    pub pen_down_percent: u32,
}

impl Default for SpoolerPolicy {
    fn default() -> Self {
        Self {
            repeat_jobs: false,
            resume_on_start: true,
            pen_up_percent: 100,
            pen_down_percent: 100,
        }
    }
}

#[derive(Debug)]
struct Shared {
    phase: Phase,
    current: Option<Arc<Job>>,
}

pub struct Spooler {
    policy: SpoolerPolicy,
    driver: Arc<dyn PlotterDriver>,
    store: JobStore,
    queue: ReorderableQueue<Arc<Job>>,
    spool: SpoolDir,
    bus: NotificationBus,
    shared: Mutex<Shared>,
    /// Wakes the confirm prompt when the current job is swapped or cleared.
    current_changed: Notify,
    /// Serializes all public mutations.
    ops: tokio::sync::Mutex<()>,
}

impl Spooler {
    pub fn new(policy: SpoolerPolicy, driver: Arc<dyn PlotterDriver>, spool: SpoolDir) -> Arc<Self> {
        Arc::new(Self {
            policy,
            driver,
            store: JobStore::new(),
            queue: ReorderableQueue::new(),
            spool,
            bus: NotificationBus::new(),
            shared: Mutex::new(Shared {
                phase: Phase::Setup,
                current: None,
            }),
            current_changed: Notify::new(),
            ops: tokio::sync::Mutex::new(()),
        })
    }

    // ---- public API -------------------------------------------------------

    /// Submit a new job. Rejects a client that already has one queued or
    /// current; the rejection is also delivered on the provided event
    /// channel so remote observers see it.
    pub async fn enqueue(
        &self,
        client: &str,
        payload: String,
        events: EventSender,
    ) -> Result<Arc<Job>, SpoolerError> {
        let doc = PlotDoc::parse(payload)?;
        let _ops = self.ops.lock().await;
        if self.store.contains(client) {
            let _ = events.send(JobEvent::Error {
                message: "cannot add job, you already have a job queued".to_string(),
                client: client.to_string(),
            });
            return Err(SpoolerError::DuplicateJob(client.to_string()));
        }
        let params = JobParams::from_doc(&doc);
        let stats = self.simulate(doc.clone()).await?;
        let job = Job::new(client, doc, params, stats, events);
        if let Err(e) = self.store.insert(job.clone()) {
            return Err(SpoolerError::DuplicateJob(e.0));
        }
        self.queue.put(job.clone());
        if let Err(e) = self
            .spool
            .save(&job, SpoolStatus::Waiting, self.queue.len(), false)
            .await
        {
            tracing::warn!(client = %job.client, error = %e, "failed to persist job");
        }
        self.bus.notify_size(self.store.len());
        self.notify_view();
        tracing::info!(
            client = %job.client,
            hash = %job.doc.short_hash(),
            estimate_s = job.stats.time_estimate as u64,
            "new job"
        );
        Ok(job)
    }

    /// Cancel a client's job. Returns `Ok(false)` when the client has no
    /// job (not an error). Without `force` the current job cannot be
    /// canceled; the rejection goes to the job's event channel.
    pub async fn cancel(&self, client: &str, force: bool) -> Result<bool, SpoolerError> {
        let _ops = self.ops.lock().await;
        let Some(job) = self.store.get(client) else {
            return Ok(false);
        };
        if !force && self.is_current(&job) {
            job.send(JobEvent::Error {
                message: "cannot cancel, already plotting".to_string(),
                client: job.client.clone(),
            });
            return Err(SpoolerError::JobPlotting(client.to_string()));
        }
        self.cancel_job(&job).await;
        Ok(true)
    }

    /// Relocate a client's job. Position 0 denotes the current job: moving a
    /// queued job there swaps it with the current job and the operator is
    /// re-prompted; moving the current job away performs the symmetric swap.
    /// Targets are clamped to the valid range, and while a plot is active
    /// position 0 is off limits. Returns the applied position.
    pub async fn move_job(&self, client: &str, position: usize) -> Result<usize, SpoolerError> {
        let _ops = self.ops.lock().await;
        let Some(job) = self.store.get(client) else {
            return Err(SpoolerError::UnknownClient(client.to_string()));
        };
        let total = self.store.len();
        let (current, phase) = {
            let shared = self.lock_shared();
            (current_of(&shared), shared.phase)
        };
        // ranks span 0..N-1 while a job occupies the current slot, 1..N
        // otherwise
        let max_target = if current.is_some() {
            total.saturating_sub(1)
        } else {
            total
        };
        let mut target = position.min(max_target);
        let mid_plot = matches!(phase, Phase::Plotting | Phase::Paused);
        let is_current = current
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &job));
        if is_current && mid_plot {
            return Err(SpoolerError::JobPlotting(client.to_string()));
        }
        if mid_plot && target == 0 {
            target = 1;
        }

        match (is_current, target) {
            (true, 0) => {}
            (true, target) => {
                self.lock_shared().current = None;
                self.queue.insert(target as isize - 1, job.clone())?;
                self.current_changed.notify_waiters();
            }
            (false, 0) if current.is_some() => {
                // swap with the current job; the run loop re-prompts
                if let Some(current) = current {
                    self.queue.remove_where(|j| Arc::ptr_eq(j, &job));
                    self.queue.insert(0, current)?;
                    self.lock_shared().current = Some(job.clone());
                    self.current_changed.notify_waiters();
                }
            }
            (false, target) => {
                let Some(index) = self.queue.index_where(|j| Arc::ptr_eq(j, &job)) else {
                    return Err(SpoolerError::UnknownClient(client.to_string()));
                };
                self.queue
                    .move_item(index as isize, target.saturating_sub(1) as isize)?;
            }
        }
        self.sync_positions().await;
        tracing::info!(client, position = target, "job moved");
        Ok(target)
    }

    pub fn status(&self) -> StatusSnapshot {
        let shared = self.lock_shared();
        StatusSnapshot {
            phase: shared.phase,
            job: shared.current.as_ref().map(|job| job.client.clone()),
            queue_size: self.store.len(),
        }
    }

    /// Unified view: the current job (unless canceled) followed by the queue.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        let (current, queued) = self.view();
        let mut out = Vec::with_capacity(queued.len() + 1);
        if let Some((job, _)) = current {
            out.push(snapshot(&job, 0));
        }
        for (index, job) in queued.iter().enumerate() {
            out.push(snapshot(job, index as i64 + 1));
        }
        out
    }

    pub fn queue_size(&self) -> usize {
        self.store.len()
    }

    pub fn subscribe_queue_size(&self) -> broadcast::Receiver<usize> {
        self.bus.subscribe_size()
    }

    /// Rebuild the waiting queue from disk, in filename-sort order, without
    /// event observers. Returns the number of jobs restored.
    pub async fn resume_from_disk(&self) -> usize {
        let loaded = match self.spool.load_waiting().await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(error = %e, "failed to scan spool directory");
                return 0;
            }
        };
        let _ops = self.ops.lock().await;
        let mut count = 0;
        for entry in loaded {
            if self.store.contains(&entry.client) {
                tracing::warn!(client = %entry.client, "duplicate client in spool, skipping file");
                continue;
            }
            let params = JobParams::from_doc(&entry.doc);
            let stats = match self.simulate(entry.doc.clone()).await {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::warn!(client = %entry.client, error = %e, "simulation failed, skipping file");
                    continue;
                }
            };
            let job = Job::resumed(
                entry.client,
                entry.doc,
                params,
                stats,
                entry.received_at,
                entry.path,
            );
            if self.store.insert(job.clone()).is_ok() {
                self.queue.put(job);
                count += 1;
            }
        }
        if count > 0 {
            self.bus.notify_size(self.store.len());
            tracing::info!(count, "resumed queued jobs from disk");
        }
        count
    }

    // ---- run loop ---------------------------------------------------------

    /// The engine's single consumer task; sole owner of the device. Runs
    /// until a shutdown is signaled.
    pub async fn run(
        self: Arc<Self>,
        prompt: Arc<dyn Prompt>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), SpoolerError> {
        if let Err(e) = self.spool.ensure_dirs().await {
            tracing::warn!(error = %e, "failed to create spool directories");
        }
        if self.policy.resume_on_start {
            self.resume_from_disk().await;
        }

        let code = self.device_call(|driver| driver.align()).await;
        if !code.is_nominal() {
            tracing::warn!(code = %code, "initial align failed");
        }
        self.set_phase(Phase::Setup);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                choice = prompt.ask(SETUP_CHOICES, "Device setup; confirm when ready") => {
                    match choice {
                        Some(PromptAction::Ready) => break,
                        Some(action) => self.side_action(action).await,
                        None => {}
                    }
                }
            }
        }

        loop {
            self.set_phase(Phase::Waiting);
            let Some(job) = self.wait_for_job(&prompt, &mut shutdown).await else {
                return Ok(());
            };
            if job.cancel_requested() {
                // canceled while queued; already removed and persisted
                continue;
            }

            {
                let mut shared = self.lock_shared();
                shared.current = Some(job.clone());
                shared.phase = Phase::ConfirmPlot;
            }
            tracing::info!(client = %job.client, "job up for confirmation");
            self.sync_positions().await;

            if !self.confirm_current(&prompt).await {
                continue;
            }
            self.plot_current(&prompt).await;
        }
    }

    /// Block until a job is available. The idle prompt runs alongside and
    /// allows align/cycle; it is dropped the instant a job arrives, which
    /// must not be treated as an error. Returns `None` on shutdown.
    async fn wait_for_job(
        &self,
        prompt: &Arc<dyn Prompt>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Option<Arc<Job>> {
        loop {
            tokio::select! {
                job = self.queue.get() => return Some(job),
                _ = shutdown.recv() => return None,
                choice = prompt.ask(IDLE_CHOICES, "Waiting for jobs") => {
                    match choice {
                        Some(action) => self.side_action(action).await,
                        None => {}
                    }
                }
            }
        }
    }

    /// Confirm-plot prompt. Re-prompts when the current job is swapped by a
    /// move; resolves false when the job was canceled instead of started.
    async fn confirm_current(&self, prompt: &Arc<dyn Prompt>) -> bool {
        loop {
            let Some(job) = self.current_job() else {
                // canceled out from under the prompt
                return false;
            };
            let message = format!(
                "Ready to plot job {} ({}, ~{}s)?",
                job.client,
                job.doc.short_hash(),
                job.stats.time_estimate as u64
            );
            tokio::select! {
                _ = self.current_changed.notified() => {}
                choice = prompt.ask(CONFIRM_CHOICES, &message) => {
                    match choice {
                        Some(PromptAction::Start) => return true,
                        Some(PromptAction::Cancel) => {
                            self.cancel_current().await;
                            return false;
                        }
                        Some(action) => self.side_action(action).await,
                        None => {}
                    }
                }
            }
        }
    }

    /// Drive the device for the current job until it is finished or
    /// canceled, including pause/resume, retry and repeat branches.
    async fn plot_current(&self, prompt: &Arc<dyn Prompt>) {
        self.set_phase(Phase::Plotting);
        if let Some(job) = self.current_job() {
            job.state().status = JobStatus::Plotting;
        }
        self.notify_view();

        let mut resume: Option<ResumeMode> = None;
        loop {
            let Some(job) = self.current_job() else { return };
            if job.cancel_requested() {
                return;
            }
            tracing::info!(client = %job.client, resuming = resume.is_some(), "plotting");
            let outcome = self.plot_blocking(&job, resume.take()).await;
            if let Some(output) = outcome.output {
                job.state().last_output = Some(output);
            }
            // a forced cancel may have landed while the device was busy
            if job.cancel_requested() || !self.is_current(&job) {
                return;
            }

            if outcome.code.is_nominal() {
                if self.policy.repeat_jobs {
                    let message = format!("Job {} done; plot it again?", job.client);
                    if let Some(PromptAction::Repeat) = prompt.ask(REPEAT_CHOICES, &message).await {
                        job.state().repetitions += 1;
                        tracing::info!(client = %job.client, "repeating job");
                        continue;
                    }
                }
                self.finish_current(&job).await;
                return;
            }

            if outcome.code.is_paused() {
                tracing::warn!(client = %job.client, code = %outcome.code, "plot paused");
                self.set_phase(Phase::Paused);
                match self.paused_prompt(prompt, &job).await {
                    PausedDecision::Resume => {
                        self.set_phase(Phase::Plotting);
                        resume = Some(ResumeMode::Plot);
                    }
                    PausedDecision::Cancel => {
                        self.cancel_current().await;
                        return;
                    }
                }
            } else {
                tracing::error!(client = %job.client, code = %outcome.code, "plot failed");
                match self.error_prompt(prompt, &job, outcome.code).await {
                    ErrorDecision::Retry => {
                        job.state().restarts += 1;
                        self.set_phase(Phase::Plotting);
                    }
                    ErrorDecision::Cancel => {
                        self.cancel_current().await;
                        return;
                    }
                }
            }
        }
    }

    async fn paused_prompt(&self, prompt: &Arc<dyn Prompt>, job: &Arc<Job>) -> PausedDecision {
        loop {
            if job.cancel_requested() || !self.is_current(job) {
                return PausedDecision::Cancel;
            }
            let message = format!("Job {} is paused", job.client);
            match prompt.ask(PAUSED_CHOICES, &message).await {
                Some(PromptAction::Resume) => return PausedDecision::Resume,
                Some(PromptAction::Home) => {
                    let outcome = self.plot_blocking(job, Some(ResumeMode::Home)).await;
                    if !outcome.code.is_nominal() {
                        tracing::warn!(code = %outcome.code, "walking home failed");
                    }
                    if let Some(output) = outcome.output {
                        job.state().last_output = Some(output);
                    }
                }
                Some(action @ (PromptAction::Align | PromptAction::Cycle)) => {
                    self.side_action(action).await;
                }
                Some(_) | None => return PausedDecision::Cancel,
            }
        }
    }

    async fn error_prompt(
        &self,
        prompt: &Arc<dyn Prompt>,
        job: &Arc<Job>,
        code: ReturnCode,
    ) -> ErrorDecision {
        loop {
            if job.cancel_requested() || !self.is_current(job) {
                return ErrorDecision::Cancel;
            }
            let message = format!("Job {} failed with {}; retry?", job.client, code);
            match prompt.ask(RETRY_CHOICES, &message).await {
                Some(PromptAction::Retry) => return ErrorDecision::Retry,
                Some(action @ (PromptAction::Align | PromptAction::Cycle)) => {
                    self.side_action(action).await;
                }
                Some(_) | None => return ErrorDecision::Cancel,
            }
        }
    }

    // ---- internals --------------------------------------------------------

    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: Phase) {
        let mut shared = self.lock_shared();
        if shared.phase != phase {
            shared.phase = phase;
            tracing::info!(?phase, "phase change");
        }
    }

    fn current_job(&self) -> Option<Arc<Job>> {
        self.lock_shared().current.clone()
    }

    fn is_current(&self, job: &Arc<Job>) -> bool {
        self.lock_shared()
            .current
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, job))
    }

    fn view(&self) -> (Option<(Arc<Job>, bool)>, Vec<Arc<Job>>) {
        let current = {
            let shared = self.lock_shared();
            let plotting = shared.phase == Phase::Plotting;
            shared
                .current
                .clone()
                .filter(|job| !job.cancel_requested())
                .map(|job| (job, plotting))
        };
        (current, self.queue.list())
    }

    fn notify_view(&self) {
        let (current, queued) = self.view();
        self.bus.notify_positions(current, &queued);
    }

    /// Bring the waiting folder in line with the in-memory order, then
    /// notify position changes. Disk failures are logged, never fatal.
    async fn sync_positions(&self) {
        let (current, queued) = self.view();
        if let Some((job, _)) = &current {
            if let Err(e) = self.spool.save(job, SpoolStatus::Waiting, 0, false).await {
                tracing::warn!(client = %job.client, error = %e, "failed to persist job");
            }
        }
        for (index, job) in queued.iter().enumerate() {
            if let Err(e) = self
                .spool
                .save(job, SpoolStatus::Waiting, index + 1, false)
                .await
            {
                tracing::warn!(client = %job.client, error = %e, "failed to persist job");
            }
        }
        self.bus.notify_positions(current, &queued);
    }

    /// Cancel a job wherever it lives: the queue or the current slot.
    /// Caller holds the op lock.
    async fn cancel_job(&self, job: &Arc<Job>) {
        {
            // an operator cancel and a remote forced cancel can race here
            let mut state = job.state();
            if state.status == JobStatus::Canceled {
                return;
            }
            state.status = JobStatus::Canceled;
        }
        job.request_cancel();
        let was_current = {
            let mut shared = self.lock_shared();
            if shared
                .current
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, job))
            {
                shared.current = None;
                true
            } else {
                false
            }
        };
        if was_current {
            self.current_changed.notify_waiters();
        } else {
            self.queue.remove_where(|j| Arc::ptr_eq(j, job));
        }
        self.store.remove(&job.client);
        if let Err(e) = self.spool.save(job, SpoolStatus::Canceled, 0, false).await {
            tracing::warn!(client = %job.client, error = %e, "failed to persist canceled job");
        }
        job.send(JobEvent::Canceled {
            client: job.client.clone(),
        });
        self.bus.notify_size(self.store.len());
        self.sync_positions().await;
        tracing::info!(client = %job.client, "job canceled");
    }

    /// Operator-initiated cancel of the current job; always applies.
    async fn cancel_current(&self) {
        let Some(job) = self.current_job() else { return };
        let _ops = self.ops.lock().await;
        self.cancel_job(&job).await;
    }

    async fn finish_current(&self, job: &Arc<Job>) {
        let _ops = self.ops.lock().await;
        if job.cancel_requested() {
            return;
        }
        job.state().status = JobStatus::Finished;
        {
            let mut shared = self.lock_shared();
            if shared
                .current
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, job))
            {
                shared.current = None;
            }
        }
        self.store.remove(&job.client);
        if let Err(e) = self.spool.save(job, SpoolStatus::Finished, 0, false).await {
            tracing::warn!(client = %job.client, error = %e, "failed to persist finished job");
        }
        job.send(JobEvent::Done {
            client: job.client.clone(),
        });
        self.bus.notify_size(self.store.len());
        self.sync_positions().await;
        tracing::info!(client = %job.client, repetitions = job.state().repetitions, "job finished");
    }

    /// Run a blocking driver call off the scheduler.
    async fn device_call<F>(&self, f: F) -> ReturnCode
    where
        F: FnOnce(&dyn PlotterDriver) -> ReturnCode + Send + 'static,
    {
        let driver = self.driver.clone();
        match task::spawn_blocking(move || f(driver.as_ref())).await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(error = %e, "device task failed");
                ReturnCode::CONNECT_FAILED
            }
        }
    }

    async fn plot_blocking(&self, job: &Arc<Job>, resume: Option<ResumeMode>) -> PlotOutcome {
        let payload = match resume {
            Some(_) => job
                .state()
                .last_output
                .clone()
                .unwrap_or_else(|| job.doc.payload().to_string()),
            None => job.doc.payload().to_string(),
        };
        let request = PlotRequest {
            payload,
            speed_fraction: f64::from(job.params.speed) / 100.0,
            pen_up_percent: self.policy.pen_up_percent,
            pen_down_percent: self.policy.pen_down_percent,
            resume,
        };
        let driver = self.driver.clone();
        match task::spawn_blocking(move || driver.plot(&request)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "device task failed");
                PlotOutcome {
                    code: ReturnCode::CONNECT_FAILED,
                    output: None,
                }
            }
        }
    }

    async fn simulate(&self, doc: PlotDoc) -> Result<PlotStats, SpoolerError> {
        let driver = self.driver.clone();
        task::spawn_blocking(move || driver.simulate(&doc))
            .await
            .map_err(|e| SpoolerError::Device(e.to_string()))
    }

    async fn side_action(&self, action: PromptAction) {
        let code = match action {
            PromptAction::Align => self.device_call(|driver| driver.align()).await,
            PromptAction::Cycle => self.device_call(|driver| driver.cycle()).await,
            _ => return,
        };
        if !code.is_nominal() {
            tracing::warn!(?action, code = %code, "device side action failed");
        }
    }
}

fn current_of(shared: &Shared) -> Option<Arc<Job>> {
    shared.current.clone()
}

fn snapshot(job: &Arc<Job>, position: i64) -> JobSnapshot {
    JobSnapshot {
        client: job.client.clone(),
        status: job.state().status,
        position,
        hash: job.doc.hash().to_string(),
        time_estimate: job.stats.time_estimate,
    }
}

enum PausedDecision {
    Resume,
    Cancel,
}

enum ErrorDecision {
    Retry,
    Cancel,
}
