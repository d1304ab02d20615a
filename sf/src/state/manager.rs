//! StepStore - actor that owns the flow
//!
//! Every mutation is one message processed by a single task, so observers
//! never see a half-merged step. After each mutation the actor broadcasts
//! the complete post-mutation snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{AspectRatio, Precondition, Step, StepId, StepPatch};

use super::messages::{StoreCommand, StoreError, StoreResponse};

/// Capacity of the change notification channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What a mutation changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    StepAdded { id: StepId },
    StepRemoved { id: StepId },
    PromptUpdated { id: StepId },
    StepUpdated { id: StepId },
    StepReset { id: StepId },
    AspectRatioChanged { aspect_ratio: AspectRatio },
}

/// Broadcast after every mutation
#[derive(Debug, Clone)]
pub struct StoreEvent {
    /// Monotonically increasing, one per mutation
    pub version: u64,
    pub change: StoreChange,
    /// Whole flow as it stands after the change
    pub steps: Arc<Vec<Step>>,
}

/// Handle to send commands to the step store actor
#[derive(Clone)]
pub struct StepStore {
    tx: mpsc::Sender<StoreCommand>,
    /// Broadcast sender for change notifications
    event_tx: broadcast::Sender<StoreEvent>,
}

impl StepStore {
    /// Spawn a store holding a single empty step
    pub fn spawn(aspect_ratio: AspectRatio) -> Self {
        Self::spawn_with_steps(Vec::new(), aspect_ratio)
    }

    /// Spawn a store seeded with steps
    ///
    /// An empty list is replaced by a single empty step: a flow is never empty.
    /// A step whose id repeats an earlier one is given a fresh id.
    pub fn spawn_with_steps(mut steps: Vec<Step>, aspect_ratio: AspectRatio) -> Self {
        debug!(step_count = steps.len(), %aspect_ratio, "spawn_with_steps: called");
        if steps.is_empty() {
            steps.push(Step::new());
        }

        let mut seen = HashSet::with_capacity(steps.len());
        for step in &mut steps {
            if !seen.insert(step.id) {
                let fresh = StepId::new();
                warn!(duplicate = %step.id, %fresh, "spawn_with_steps: duplicate step id replaced");
                step.id = fresh;
                seen.insert(fresh);
            }
        }

        let (tx, rx) = mpsc::channel(256);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let state = FlowState {
            steps,
            aspect_ratio,
            version: 0,
            event_tx: event_tx.clone(),
        };

        // Spawn the actor task
        tokio::spawn(actor_loop(state, rx));

        info!("StepStore spawned");

        Self { tx, event_tx }
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<StoreResponse<T>>) -> StoreCommand) -> StoreResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StoreError::ChannelError)?;
        reply_rx.await.map_err(|_| StoreError::ChannelError)?
    }

    // === Step operations ===

    /// Append an empty idle step
    pub async fn add_step(&self) -> StoreResponse<StepId> {
        debug!("add_step: called");
        self.add_step_with_prompt("").await
    }

    /// Append an idle step with a prompt
    pub async fn add_step_with_prompt(&self, prompt: impl Into<String>) -> StoreResponse<StepId> {
        let prompt = prompt.into();
        debug!(prompt_len = prompt.len(), "add_step_with_prompt: called");
        self.request(|reply| StoreCommand::AddStep { prompt, reply }).await
    }

    /// Remove a step; `false` when refused (last step) or unknown
    pub async fn remove_step(&self, id: StepId) -> StoreResponse<bool> {
        debug!(%id, "remove_step: called");
        self.request(|reply| StoreCommand::RemoveStep { id, reply }).await
    }

    /// Replace the prompt verbatim, leaving status and image alone
    pub async fn update_prompt(&self, id: StepId, prompt: impl Into<String>) -> StoreResponse<()> {
        debug!(%id, "update_prompt: called");
        let prompt = prompt.into();
        self.request(|reply| StoreCommand::UpdatePrompt { id, prompt, reply }).await
    }

    /// Merge a patch into a step, returning the merged step
    pub async fn update_step(&self, id: StepId, patch: StepPatch) -> StoreResponse<Step> {
        debug!(%id, status = ?patch.status, "update_step: called");
        self.request(|reply| StoreCommand::UpdateStep { id, patch, reply }).await
    }

    /// Merge a patch only if the precondition holds
    ///
    /// Check and merge happen in one transaction. `None` means the step is
    /// missing or the precondition failed, and nothing changed.
    pub async fn update_step_if(
        &self,
        id: StepId,
        precondition: Precondition,
        patch: StepPatch,
    ) -> StoreResponse<Option<Step>> {
        debug!(%id, ?precondition, "update_step_if: called");
        self.request(|reply| StoreCommand::UpdateStepIf {
            id,
            precondition,
            patch,
            reply,
        })
        .await
    }

    /// Clear a step's image and error so the next run regenerates it
    pub async fn reset_step(&self, id: StepId) -> StoreResponse<Step> {
        debug!(%id, "reset_step: called");
        self.request(|reply| StoreCommand::ResetStep { id, reply }).await
    }

    /// Get a step by id
    pub async fn get_step(&self, id: StepId) -> StoreResponse<Option<Step>> {
        debug!(%id, "get_step: called");
        self.request(|reply| StoreCommand::GetStep { id, reply }).await
    }

    /// Ordered snapshot of the flow
    pub async fn list_steps(&self) -> StoreResponse<Vec<Step>> {
        debug!("list_steps: called");
        self.request(|reply| StoreCommand::ListSteps { reply }).await
    }

    // === Flow settings ===

    pub async fn aspect_ratio(&self) -> StoreResponse<AspectRatio> {
        debug!("aspect_ratio: called");
        self.request(|reply| StoreCommand::GetAspectRatio { reply }).await
    }

    pub async fn set_aspect_ratio(&self, aspect_ratio: AspectRatio) -> StoreResponse<()> {
        debug!(%aspect_ratio, "set_aspect_ratio: called");
        self.request(|reply| StoreCommand::SetAspectRatio { aspect_ratio, reply })
            .await
    }

    /// Stop the actor
    pub async fn shutdown(&self) -> StoreResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| StoreError::ChannelError)
    }
}

/// State owned by the actor task
struct FlowState {
    steps: Vec<Step>,
    aspect_ratio: AspectRatio,
    version: u64,
    event_tx: broadcast::Sender<StoreEvent>,
}

impl FlowState {
    fn find_mut(&mut self, id: StepId) -> StoreResponse<&mut Step> {
        self.steps
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    fn add(&mut self, prompt: String) -> StepId {
        let step = Step::with_prompt(prompt);
        let id = step.id;
        self.steps.push(step);
        self.publish(StoreChange::StepAdded { id });
        id
    }

    fn remove(&mut self, id: StepId) -> bool {
        if self.steps.len() <= 1 {
            debug!(%id, "remove: refusing to remove the last step");
            return false;
        }
        let Some(index) = self.steps.iter().position(|s| s.id == id) else {
            debug!(%id, "remove: unknown step");
            return false;
        };
        self.steps.remove(index);
        self.publish(StoreChange::StepRemoved { id });
        true
    }

    fn update_prompt(&mut self, id: StepId, prompt: String) -> StoreResponse<()> {
        self.find_mut(id)?.prompt = prompt;
        self.publish(StoreChange::PromptUpdated { id });
        Ok(())
    }

    fn update(&mut self, id: StepId, patch: StepPatch) -> StoreResponse<Step> {
        let step = self.find_mut(id)?;
        if let Some(next) = patch.status
            && !step.status.can_transition_to(next)
        {
            return Err(StoreError::InvalidTransition {
                id,
                from: step.status,
                to: next,
            });
        }
        patch.apply_to(step);
        let merged = step.clone();
        self.publish(StoreChange::StepUpdated { id });
        Ok(merged)
    }

    fn update_if(&mut self, id: StepId, precondition: &Precondition, patch: StepPatch) -> StoreResponse<Option<Step>> {
        let holds = match self.steps.iter().find(|s| s.id == id) {
            Some(step) => {
                let holds = precondition.holds(step);
                if !holds {
                    debug!(%id, status = %step.status, "update_if: precondition failed");
                }
                holds
            }
            None => {
                debug!(%id, "update_if: unknown step");
                false
            }
        };

        if holds { self.update(id, patch).map(Some) } else { Ok(None) }
    }

    fn reset(&mut self, id: StepId) -> StoreResponse<Step> {
        let step = self.find_mut(id)?;
        if step.status.is_busy() {
            return Err(StoreError::Busy(id));
        }
        step.reset();
        let reset = step.clone();
        self.publish(StoreChange::StepReset { id });
        Ok(reset)
    }

    fn set_aspect_ratio(&mut self, aspect_ratio: AspectRatio) {
        if self.aspect_ratio != aspect_ratio {
            self.aspect_ratio = aspect_ratio;
            self.publish(StoreChange::AspectRatioChanged { aspect_ratio });
        }
    }

    /// Bump the version and broadcast the new snapshot
    fn publish(&mut self, change: StoreChange) {
        self.version += 1;
        debug!(version = self.version, ?change, "publish: called");
        let event = StoreEvent {
            version: self.version,
            change,
            steps: Arc::new(self.steps.clone()),
        };
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Actor loop that processes commands
async fn actor_loop(mut state: FlowState, mut rx: mpsc::Receiver<StoreCommand>) {
    debug!("StepStore actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::AddStep { prompt, reply } => {
                debug!("actor_loop: AddStep command");
                let _ = reply.send(Ok(state.add(prompt)));
            }

            StoreCommand::RemoveStep { id, reply } => {
                debug!(%id, "actor_loop: RemoveStep command");
                let _ = reply.send(Ok(state.remove(id)));
            }

            StoreCommand::UpdatePrompt { id, prompt, reply } => {
                debug!(%id, "actor_loop: UpdatePrompt command");
                let _ = reply.send(state.update_prompt(id, prompt));
            }

            StoreCommand::UpdateStep { id, patch, reply } => {
                debug!(%id, "actor_loop: UpdateStep command");
                let _ = reply.send(state.update(id, patch));
            }

            StoreCommand::UpdateStepIf {
                id,
                precondition,
                patch,
                reply,
            } => {
                debug!(%id, "actor_loop: UpdateStepIf command");
                let _ = reply.send(state.update_if(id, &precondition, patch));
            }

            StoreCommand::ResetStep { id, reply } => {
                debug!(%id, "actor_loop: ResetStep command");
                let _ = reply.send(state.reset(id));
            }

            StoreCommand::GetStep { id, reply } => {
                debug!(%id, "actor_loop: GetStep command");
                let step = state.steps.iter().find(|s| s.id == id).cloned();
                let _ = reply.send(Ok(step));
            }

            StoreCommand::ListSteps { reply } => {
                debug!("actor_loop: ListSteps command");
                let _ = reply.send(Ok(state.steps.clone()));
            }

            StoreCommand::GetAspectRatio { reply } => {
                debug!("actor_loop: GetAspectRatio command");
                let _ = reply.send(Ok(state.aspect_ratio));
            }

            StoreCommand::SetAspectRatio { aspect_ratio, reply } => {
                debug!(%aspect_ratio, "actor_loop: SetAspectRatio command");
                state.set_aspect_ratio(aspect_ratio);
                let _ = reply.send(Ok(()));
            }

            StoreCommand::Shutdown => {
                info!("StepStore shutting down");
                break;
            }
        }
    }

    debug!("StepStore actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ImageData, StepStatus};

    fn image(tag: u8) -> ImageData {
        ImageData::new("image/png", vec![tag; 8])
    }

    #[tokio::test]
    async fn test_new_store_has_one_empty_step() {
        let store = StepStore::spawn(AspectRatio::Wide);

        let steps = store.list_steps().await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Idle);
        assert!(steps[0].prompt.is_empty());

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_add_appends_in_order() {
        let store = StepStore::spawn(AspectRatio::Wide);

        let second = store.add_step_with_prompt("second").await.unwrap();
        let third = store.add_step().await.unwrap();

        let steps = store.list_steps().await.unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].id, second);
        assert_eq!(steps[1].prompt, "second");
        assert_eq!(steps[2].id, third);
        assert_eq!(steps[2].status, StepStatus::Idle);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_seeded_duplicate_ids_are_replaced() {
        let step = Step::with_prompt("room");
        let store = StepStore::spawn_with_steps(vec![step.clone(), step.clone()], AspectRatio::Wide);

        let steps = store.list_steps().await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].id, step.id);
        assert_ne!(steps[1].id, step.id);
        assert_eq!(steps[1].prompt, "room");

        // Both remain addressable
        assert!(store.remove_step(steps[1].id).await.unwrap());
        assert_eq!(store.list_steps().await.unwrap()[0].id, step.id);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_last_step_is_refused() {
        let store = StepStore::spawn(AspectRatio::Wide);
        let only = store.list_steps().await.unwrap()[0].id;

        assert!(!store.remove_step(only).await.unwrap());
        assert_eq!(store.list_steps().await.unwrap().len(), 1);

        let other = store.add_step().await.unwrap();
        assert!(store.remove_step(only).await.unwrap());
        assert!(!store.remove_step(other).await.unwrap());

        let steps = store.list_steps().await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].id, other);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_unknown_step_is_refused() {
        let store = StepStore::spawn(AspectRatio::Wide);
        store.add_step().await.unwrap();

        assert!(!store.remove_step(StepId::new()).await.unwrap());
        assert_eq!(store.list_steps().await.unwrap().len(), 2);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_prompt_keeps_status_and_image() {
        let mut done = Step::with_prompt("empty room");
        done.status = StepStatus::Completed;
        done.image = Some(image(1));
        let id = done.id;
        let store = StepStore::spawn_with_steps(vec![done], AspectRatio::Wide);

        store.update_prompt(id, "  a brighter room ").await.unwrap();

        let step = store.get_step(id).await.unwrap().unwrap();
        assert_eq!(step.prompt, "  a brighter room ");
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.image, Some(image(1)));

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_unknown_step_is_not_found() {
        let store = StepStore::spawn(AspectRatio::Wide);
        let missing = StepId::new();

        let result = store.update_prompt(missing, "x").await;
        assert!(matches!(result, Err(StoreError::NotFound(id)) if id == missing));

        let result = store.update_step(missing, StepPatch::generating()).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        assert!(store.get_step(missing).await.unwrap().is_none());

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_step_merges_and_returns() {
        let store = StepStore::spawn(AspectRatio::Wide);
        let id = store.list_steps().await.unwrap()[0].id;

        let step = store.update_step(id, StepPatch::generating()).await.unwrap();
        assert_eq!(step.status, StepStatus::Generating);

        let step = store.update_step(id, StepPatch::generated(image(3))).await.unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.image, Some(image(3)));
        assert!(!step.is_upscaled);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_step_rejects_illegal_transition() {
        let store = StepStore::spawn(AspectRatio::Wide);
        let id = store.list_steps().await.unwrap()[0].id;

        let result = store.update_step(id, StepPatch::generated(image(1))).await;
        assert!(matches!(
            result,
            Err(StoreError::InvalidTransition {
                from: StepStatus::Idle,
                to: StepStatus::Completed,
                ..
            })
        ));

        // Nothing was merged
        let step = store.get_step(id).await.unwrap().unwrap();
        assert_eq!(step.status, StepStatus::Idle);
        assert!(step.image.is_none());

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_step_if() {
        let mut done = Step::with_prompt("room");
        done.status = StepStatus::Completed;
        done.image = Some(image(1));
        let id = done.id;
        let store = StepStore::spawn_with_steps(vec![done], AspectRatio::Wide);

        let first = store
            .update_step_if(id, Precondition::upscalable(), StepPatch::upscaling())
            .await
            .unwrap();
        assert_eq!(first.map(|s| s.status), Some(StepStatus::Upscaling));

        // Second claim fails: the step is already upscaling
        let second = store
            .update_step_if(id, Precondition::upscalable(), StepPatch::upscaling())
            .await
            .unwrap();
        assert!(second.is_none());

        let missing = store
            .update_step_if(StepId::new(), Precondition::upscalable(), StepPatch::upscaling())
            .await
            .unwrap();
        assert!(missing.is_none());

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_step() {
        let mut done = Step::with_prompt("room");
        done.status = StepStatus::Completed;
        done.image = Some(image(1));
        done.is_upscaled = true;
        let id = done.id;
        let store = StepStore::spawn_with_steps(vec![done], AspectRatio::Wide);

        let step = store.reset_step(id).await.unwrap();
        assert_eq!(step.status, StepStatus::Idle);
        assert!(step.image.is_none());
        assert!(!step.is_upscaled);
        assert_eq!(step.prompt, "room");

        store.update_step(id, StepPatch::generating()).await.unwrap();
        assert!(matches!(store.reset_step(id).await, Err(StoreError::Busy(_))));

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_aspect_ratio() {
        let store = StepStore::spawn(AspectRatio::Tall);
        assert_eq!(store.aspect_ratio().await.unwrap(), AspectRatio::Tall);

        store.set_aspect_ratio(AspectRatio::Wide).await.unwrap();
        assert_eq!(store.aspect_ratio().await.unwrap(), AspectRatio::Wide);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_every_mutation_publishes_one_snapshot() {
        let store = StepStore::spawn(AspectRatio::Wide);
        let mut events = store.subscribe();
        let first = store.list_steps().await.unwrap()[0].id;

        let second = store.add_step().await.unwrap();
        store.update_prompt(first, "room").await.unwrap();
        store.update_step(first, StepPatch::generating()).await.unwrap();
        store.set_aspect_ratio(AspectRatio::Wide).await.unwrap(); // unchanged, no event
        store.set_aspect_ratio(AspectRatio::Tall).await.unwrap();
        store.remove_step(second).await.unwrap();
        store.remove_step(first).await.unwrap(); // refused, no event

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }

        let versions: Vec<u64> = received.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);

        assert_eq!(received[0].change, StoreChange::StepAdded { id: second });
        assert_eq!(received[0].steps.len(), 2);
        assert_eq!(received[1].steps[0].prompt, "room");
        assert_eq!(received[2].steps[0].status, StepStatus::Generating);
        assert_eq!(
            received[3].change,
            StoreChange::AspectRatioChanged {
                aspect_ratio: AspectRatio::Tall
            }
        );
        assert_eq!(received[4].change, StoreChange::StepRemoved { id: second });
        assert_eq!(received[4].steps.len(), 1);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let store = StepStore::spawn(AspectRatio::Wide);
        store.shutdown().await.unwrap();

        // Give the actor a moment to exit
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(matches!(store.list_steps().await, Err(StoreError::ChannelError)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Add,
            Remove(usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![Just(Op::Add), (0usize..8).prop_map(Op::Remove)]
        }

        proptest! {
            #[test]
            fn test_flow_never_empty_and_ids_unique(ops in proptest::collection::vec(op(), 0..40)) {
                let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
                rt.block_on(async {
                    let store = StepStore::spawn(AspectRatio::Wide);
                    let mut expected = 1usize;

                    for op in ops {
                        match op {
                            Op::Add => {
                                store.add_step().await.unwrap();
                                expected += 1;
                            }
                            Op::Remove(index) => {
                                let steps = store.list_steps().await.unwrap();
                                let id = steps[index % steps.len()].id;
                                if store.remove_step(id).await.unwrap() {
                                    expected -= 1;
                                }
                            }
                        }

                        let steps = store.list_steps().await.unwrap();
                        assert!(!steps.is_empty());
                        assert_eq!(steps.len(), expected);

                        let mut ids: Vec<StepId> = steps.iter().map(|s| s.id).collect();
                        ids.sort();
                        ids.dedup();
                        assert_eq!(ids.len(), steps.len());
                    }

                    store.shutdown().await.unwrap();
                });
            }
        }
    }
}
