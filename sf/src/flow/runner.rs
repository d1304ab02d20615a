//! FlowRunner - the sequential generation walk

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::domain::{ImageData, Step, StepId, StepPatch, StepStatus};
use crate::images::{GenerateRequest, ImageClient};
use crate::state::StepStore;

use super::{FlowError, publish};

/// Counts of what a run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowReport {
    /// Steps generated by this run
    pub generated: usize,
    /// Completed steps whose image was reused
    pub reused: usize,
    /// Blank-prompt steps passed over
    pub skipped: usize,
}

/// Result of a `run_flow` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Another run was in progress; nothing was done
    AlreadyRunning,
    /// Every step was visited
    Finished(FlowReport),
    /// Walk stopped at `step_id`; later steps were not touched
    Halted {
        step_id: StepId,
        error: String,
        report: FlowReport,
    },
}

/// What happened to one step of the walk
enum StepOutcome {
    /// Blank prompt; carries the step's image, if any
    Skipped(Option<ImageData>),
    /// Already had an image
    Reused(ImageData),
    /// Freshly generated
    Generated(ImageData),
    /// Generation failed; the step is marked Error
    Failed(String),
    /// Another caller owns the step; left untouched
    Blocked(String),
}

/// Clears the single-flight flag however the run ends
struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
        debug!("RunGuard: flow released");
    }
}

/// Runs the flow: one step at a time, each continuing from the last image
#[derive(Clone)]
pub struct FlowRunner {
    store: StepStore,
    client: Arc<dyn ImageClient>,
    running: Arc<AtomicBool>,
}

impl FlowRunner {
    pub fn new(store: StepStore, client: Arc<dyn ImageClient>) -> Self {
        Self {
            store,
            client,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True while a run is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Walk the flow in order, generating what is missing
    ///
    /// The order is fixed when the run starts; each step is re-read just
    /// before it is processed so edits made meanwhile are honored. The first
    /// generation failure ends the walk, since every later step would be
    /// drawn from a broken reference.
    pub async fn run_flow(&self) -> Result<FlowOutcome, FlowError> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            info!("run_flow: already running, ignoring");
            return Ok(FlowOutcome::AlreadyRunning);
        };

        let order: Vec<StepId> = self.store.list_steps().await?.iter().map(|s| s.id).collect();
        info!(step_count = order.len(), "run_flow: starting");

        let mut report = FlowReport::default();
        let mut reference: Option<ImageData> = None;

        for (position, id) in order.into_iter().enumerate() {
            let Some(step) = self.store.get_step(id).await? else {
                debug!(%id, position, "run_flow: step removed since run started");
                continue;
            };

            match self.advance(step, reference.clone()).await? {
                StepOutcome::Skipped(image) => {
                    debug!(%id, position, carries_image = image.is_some(), "run_flow: skipped blank step");
                    report.skipped += 1;
                    if image.is_some() {
                        reference = image;
                    }
                }
                StepOutcome::Reused(image) => {
                    debug!(%id, position, "run_flow: reused existing image");
                    report.reused += 1;
                    reference = Some(image);
                }
                StepOutcome::Generated(image) => {
                    info!(%id, position, bytes = image.len(), "run_flow: step generated");
                    report.generated += 1;
                    reference = Some(image);
                }
                StepOutcome::Failed(error) | StepOutcome::Blocked(error) => {
                    warn!(%id, position, %error, "run_flow: halting");
                    return Ok(FlowOutcome::Halted {
                        step_id: id,
                        error,
                        report,
                    });
                }
            }
        }

        info!(?report, "run_flow: finished");
        Ok(FlowOutcome::Finished(report))
    }

    /// Process one step given the reference image carried so far
    async fn advance(&self, step: Step, reference: Option<ImageData>) -> Result<StepOutcome, FlowError> {
        debug!(id = %step.id, status = %step.status, has_reference = reference.is_some(), "advance: called");

        if !step.has_prompt() {
            return Ok(StepOutcome::Skipped(step.image));
        }

        match (step.status, step.image) {
            // An in-flight upscale still holds a good image
            (StepStatus::Completed | StepStatus::Upscaling, Some(image)) => return Ok(StepOutcome::Reused(image)),
            (StepStatus::Generating, _) => {
                return Ok(StepOutcome::Blocked(format!("Step {} is already generating", step.id.short())));
            }
            _ => {}
        }

        if publish(&self.store, step.id, StepPatch::generating()).await?.is_none() {
            return Ok(StepOutcome::Skipped(None));
        }

        // Captured per call: a change mid-run applies from the next step on
        let aspect_ratio = self.store.aspect_ratio().await?;
        let request = GenerateRequest {
            prompt: step.prompt,
            reference,
            aspect_ratio,
        };

        match self.client.generate(request).await {
            Ok(image) => {
                publish(&self.store, step.id, StepPatch::generated(image.clone())).await?;
                Ok(StepOutcome::Generated(image))
            }
            Err(e) => {
                let message = e.to_string();
                warn!(id = %step.id, error = %e, "advance: generation failed");
                publish(&self.store, step.id, StepPatch::failed(message.clone())).await?;
                Ok(StepOutcome::Failed(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AspectRatio;
    use crate::images::ImageError;
    use crate::images::client::mock::MockImageClient;
    use tokio::sync::Semaphore;

    fn image(tag: u8) -> ImageData {
        ImageData::new("image/png", vec![tag; 8])
    }

    fn completed(prompt: &str, img: ImageData) -> Step {
        let mut step = Step::with_prompt(prompt);
        step.status = StepStatus::Completed;
        step.image = Some(img);
        step
    }

    fn setup(steps: Vec<Step>) -> (StepStore, Arc<MockImageClient>, FlowRunner) {
        let store = StepStore::spawn_with_steps(steps, AspectRatio::Wide);
        let client = Arc::new(MockImageClient::new());
        let runner = FlowRunner::new(store.clone(), client.clone());
        (store, client, runner)
    }

    #[tokio::test]
    async fn test_two_steps_chain_reference() {
        let (store, client, runner) = setup(vec![Step::with_prompt("empty room"), Step::with_prompt("add a sofa")]);
        client.push_generate(Ok(image(1))).push_generate(Ok(image(2)));

        let outcome = runner.run_flow().await.unwrap();
        assert_eq!(
            outcome,
            FlowOutcome::Finished(FlowReport {
                generated: 2,
                reused: 0,
                skipped: 0
            })
        );

        let requests = client.generate_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].prompt, "empty room");
        assert!(requests[0].reference.is_none());
        assert_eq!(requests[1].prompt, "add a sofa");
        assert_eq!(requests[1].reference, Some(image(1)));

        let steps = store.list_steps().await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert_eq!(steps[0].image, Some(image(1)));
        assert!(!steps[0].is_upscaled);
        assert_eq!(steps[1].status, StepStatus::Completed);
        assert_eq!(steps[1].image, Some(image(2)));
        assert!(!steps[1].is_upscaled);
    }

    #[tokio::test]
    async fn test_failure_halts_walk() {
        let (store, client, runner) = setup(vec![Step::with_prompt("empty room"), Step::with_prompt("add a sofa")]);
        client.push_generate(Err(ImageError::Generation("rate limited".to_string())));

        let outcome = runner.run_flow().await.unwrap();
        let steps = store.list_steps().await.unwrap();
        assert_eq!(
            outcome,
            FlowOutcome::Halted {
                step_id: steps[0].id,
                error: "rate limited".to_string(),
                report: FlowReport::default(),
            }
        );

        assert_eq!(steps[0].status, StepStatus::Error);
        assert_eq!(steps[0].error.as_deref(), Some("rate limited"));
        assert_eq!(steps[1].status, StepStatus::Idle);
        assert!(steps[1].image.is_none());
        assert_eq!(client.generate_requests().len(), 1);
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_completed_step_is_reused() {
        let (store, client, runner) = setup(vec![completed("empty room", image(1)), Step::with_prompt("add a sofa")]);
        let before = store.list_steps().await.unwrap()[0].clone();
        client.push_generate(Ok(image(2)));

        runner.run_flow().await.unwrap();

        let requests = client.generate_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt, "add a sofa");
        assert_eq!(requests[0].reference, Some(image(1)));

        let steps = store.list_steps().await.unwrap();
        assert_eq!(steps[0], before);
        assert_eq!(steps[1].image, Some(image(2)));
    }

    #[tokio::test]
    async fn test_rerun_never_regenerates() {
        let (_store, client, runner) = setup(vec![Step::with_prompt("room"), Step::with_prompt("sofa")]);
        client.push_generate(Ok(image(1))).push_generate(Ok(image(2)));

        runner.run_flow().await.unwrap();
        let outcome = runner.run_flow().await.unwrap();

        assert_eq!(
            outcome,
            FlowOutcome::Finished(FlowReport {
                generated: 0,
                reused: 2,
                skipped: 0
            })
        );
        assert_eq!(client.generate_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_blank_step_without_image_keeps_reference() {
        let (store, client, runner) = setup(vec![
            Step::with_prompt("room"),
            Step::with_prompt("   "),
            Step::with_prompt("sofa"),
        ]);
        client.push_generate(Ok(image(1))).push_generate(Ok(image(3)));

        let outcome = runner.run_flow().await.unwrap();
        assert_eq!(
            outcome,
            FlowOutcome::Finished(FlowReport {
                generated: 2,
                reused: 0,
                skipped: 1
            })
        );

        let requests = client.generate_requests();
        assert_eq!(requests[1].reference, Some(image(1)));

        let steps = store.list_steps().await.unwrap();
        assert_eq!(steps[1].status, StepStatus::Idle);
    }

    #[tokio::test]
    async fn test_blank_step_with_image_propagates_it() {
        // Prompt cleared after the step was generated
        let (_store, client, runner) = setup(vec![
            Step::with_prompt("room"),
            completed("", image(9)),
            Step::with_prompt("sofa"),
        ]);
        client.push_generate(Ok(image(1))).push_generate(Ok(image(3)));

        runner.run_flow().await.unwrap();

        let requests = client.generate_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].reference, Some(image(9)));
    }

    #[tokio::test]
    async fn test_error_step_is_retried_and_resets_upscaled() {
        let mut failed = Step::with_prompt("room");
        failed.status = StepStatus::Error;
        failed.error = Some("boom".to_string());
        failed.image = Some(image(5));
        failed.is_upscaled = true;
        let (store, client, runner) = setup(vec![failed]);
        client.push_generate(Ok(image(6)));

        runner.run_flow().await.unwrap();

        let step = &store.list_steps().await.unwrap()[0];
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.image, Some(image(6)));
        assert!(step.error.is_none());
        assert!(!step.is_upscaled);
    }

    #[tokio::test]
    async fn test_reset_step_regenerates() {
        let (store, client, runner) = setup(vec![completed("room", image(1))]);
        let id = store.list_steps().await.unwrap()[0].id;
        client.push_generate(Ok(image(2)));

        store.reset_step(id).await.unwrap();
        runner.run_flow().await.unwrap();

        assert_eq!(client.generate_requests().len(), 1);
        assert_eq!(store.get_step(id).await.unwrap().unwrap().image, Some(image(2)));
    }

    #[tokio::test]
    async fn test_generating_step_blocks_walk() {
        let mut busy = Step::with_prompt("room");
        busy.status = StepStatus::Generating;
        let (store, client, runner) = setup(vec![busy, Step::with_prompt("sofa")]);

        let outcome = runner.run_flow().await.unwrap();
        assert!(matches!(outcome, FlowOutcome::Halted { .. }));
        assert!(client.generate_requests().is_empty());

        let steps = store.list_steps().await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Generating);
        assert_eq!(steps[1].status, StepStatus::Idle);
    }

    #[tokio::test]
    async fn test_second_run_while_running_is_ignored() {
        let store = StepStore::spawn_with_steps(vec![Step::with_prompt("room")], AspectRatio::Wide);
        let gate = Arc::new(Semaphore::new(0));
        let client = Arc::new(MockImageClient::gated(gate.clone()));
        client.push_generate(Ok(image(1)));
        let runner = FlowRunner::new(store.clone(), client.clone());

        let entered = client.entered();
        let first = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run_flow().await }
        });
        entered.notified().await;

        assert!(runner.is_running());
        assert_eq!(runner.run_flow().await.unwrap(), FlowOutcome::AlreadyRunning);
        assert_eq!(client.generate_requests().len(), 1);

        gate.add_permits(1);
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, FlowOutcome::Finished(_)));
        assert!(!runner.is_running());

        // Flag released: the next run proceeds
        assert!(matches!(runner.run_flow().await.unwrap(), FlowOutcome::Finished(_)));
    }

    #[tokio::test]
    async fn test_step_committed_before_next_call_and_edits_honored() {
        let store = StepStore::spawn_with_steps(
            vec![Step::with_prompt("room"), Step::with_prompt("sofa")],
            AspectRatio::Wide,
        );
        let ids: Vec<StepId> = store.list_steps().await.unwrap().iter().map(|s| s.id).collect();
        let gate = Arc::new(Semaphore::new(0));
        let client = Arc::new(MockImageClient::gated(gate.clone()));
        client.push_generate(Ok(image(1))).push_generate(Ok(image(2)));
        let runner = FlowRunner::new(store.clone(), client.clone());

        let entered = client.entered();
        let task = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run_flow().await }
        });

        // Step 1 in flight: step 2 untouched, edits land before it is read
        entered.notified().await;
        assert_eq!(store.get_step(ids[0]).await.unwrap().unwrap().status, StepStatus::Generating);
        assert_eq!(store.get_step(ids[1]).await.unwrap().unwrap().status, StepStatus::Idle);
        store.update_prompt(ids[1], "red sofa").await.unwrap();
        store.set_aspect_ratio(AspectRatio::Tall).await.unwrap();
        gate.add_permits(1);

        // Step 2 in flight: step 1 already committed
        entered.notified().await;
        let first = store.get_step(ids[0]).await.unwrap().unwrap();
        assert_eq!(first.status, StepStatus::Completed);
        assert_eq!(first.image, Some(image(1)));
        gate.add_permits(1);

        task.await.unwrap().unwrap();

        let requests = client.generate_requests();
        assert_eq!(requests[0].aspect_ratio, AspectRatio::Wide);
        assert_eq!(requests[1].prompt, "red sofa");
        assert_eq!(requests[1].aspect_ratio, AspectRatio::Tall);
    }

    #[tokio::test]
    async fn test_step_removed_in_flight_still_feeds_reference() {
        let store = StepStore::spawn_with_steps(
            vec![Step::with_prompt("room"), Step::with_prompt("sofa")],
            AspectRatio::Wide,
        );
        let ids: Vec<StepId> = store.list_steps().await.unwrap().iter().map(|s| s.id).collect();
        let gate = Arc::new(Semaphore::new(0));
        let client = Arc::new(MockImageClient::gated(gate.clone()));
        client.push_generate(Ok(image(1))).push_generate(Ok(image(2)));
        let runner = FlowRunner::new(store.clone(), client.clone());

        let entered = client.entered();
        let task = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run_flow().await }
        });

        entered.notified().await;
        assert!(store.remove_step(ids[0]).await.unwrap());
        gate.add_permits(2);

        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, FlowOutcome::Finished(_)));

        let requests = client.generate_requests();
        assert_eq!(requests[1].reference, Some(image(1)));

        let steps = store.list_steps().await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].image, Some(image(2)));
    }
}
