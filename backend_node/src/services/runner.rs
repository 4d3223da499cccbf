//! Background training runner.
//!
//! Each session gets a `watch` channel carrying the latest control signal.
//! The training loop checks it between batches and parks on `changed()`
//! while paused, so pause costs nothing but a channel read per batch and
//! resume wakes the loop immediately.

use super::blobstore::BlobStore;
use crate::ai::trainer::{load_dataset, TrainParams, Trainer};
use crate::ai::{self, GradientMap};
use crate::config::Config;
use crate::db::{EpochMetric, ProgressSnapshot, Registry, TrainingResult};
use chrono::Utc;
use ndarray::{Array2, Axis};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

const SYNTHETIC_SAMPLES: usize = 1000;

/// Control signal for a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Run,
    Pause,
    Stop,
}

/// Registry of control channels for live training sessions.
#[derive(Clone, Default)]
pub struct SessionControls {
    inner: Arc<RwLock<HashMap<String, watch::Sender<Control>>>>,
}

impl SessionControls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the control channel for a new session.
    pub fn register(&self, session_id: &str) -> watch::Receiver<Control> {
        let (tx, rx) = watch::channel(Control::Run);
        self.inner
            .write()
            .unwrap()
            .insert(session_id.to_string(), tx);
        rx
    }

    /// Send a signal to a session. Returns false when the session has no
    /// live control channel.
    pub fn signal(&self, session_id: &str, control: Control) -> bool {
        match self.inner.read().unwrap().get(session_id) {
            Some(tx) => tx.send(control).is_ok(),
            None => false,
        }
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.inner.read().unwrap().contains_key(session_id)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.inner.read().unwrap().keys().cloned().collect()
    }

    fn remove(&self, session_id: &str) {
        self.inner.write().unwrap().remove(session_id);
    }
}

/// Spawns and drives training sessions against the document store.
#[derive(Clone)]
pub struct TrainingRunner {
    registry: Registry,
    blobs: Arc<BlobStore>,
    controls: SessionControls,
    batch_pace: Duration,
}

impl TrainingRunner {
    pub fn new(
        registry: Registry,
        blobs: Arc<BlobStore>,
        controls: SessionControls,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            blobs,
            controls,
            batch_pace: Duration::from_millis(config.batch_pace_ms),
        }
    }

    /// Register a control channel and run the session in a background task.
    pub fn spawn(&self, session_id: String, params: TrainParams) {
        let rx = self.controls.register(&session_id);
        let runner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.run(&session_id, params, rx).await {
                log::error!("training session {session_id} failed: {e}");
                let _ = runner
                    .registry
                    .update_training_session(
                        &session_id,
                        json!({"status": "failed", "error": e.to_string()}),
                    )
                    .await;
            }
            runner.controls.remove(&session_id);
        });
    }

    async fn run(
        &self,
        session_id: &str,
        mut params: TrainParams,
        mut rx: watch::Receiver<Control>,
    ) -> anyhow::Result<()> {
        let session = self.registry.require_training_session(session_id).await?;
        let model_id = session
            .get("model_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let (features, targets) = self.training_data(&mut params);
        let (features, targets, holdout) =
            split_validation(features, targets, params.validation_split);
        let samples = features.nrows();
        let batch_size = params.batch_size.max(1);
        let batches_per_epoch = samples.div_ceil(batch_size);
        let total_batches = params.epochs * batches_per_epoch;

        self.registry
            .update_training_session(session_id, json!({"status": "training"}))
            .await?;
        log::info!(
            "session {session_id}: training {} for {} epochs, {} samples, batch size {}",
            params.model_type,
            params.epochs,
            samples,
            batch_size
        );

        let mut trainer = Trainer::new(&params);
        let start = Utc::now();
        let mut indices: Vec<usize> = (0..samples).collect();
        let mut epoch_metrics: Vec<EpochMetric> = Vec::with_capacity(params.epochs);
        let mut final_loss = 0.0;
        let mut final_accuracy = 0.0;

        for epoch in 0..params.epochs {
            let epoch_start = Utc::now();
            indices.shuffle(&mut rand::thread_rng());

            let mut epoch_loss = 0.0;
            let mut epoch_accuracy = 0.0;
            let mut batches = 0;
            for (batch_idx, chunk) in indices.chunks(batch_size).enumerate() {
                if wait_for_resume(&mut rx).await == Control::Stop {
                    log::info!("session {session_id}: stopped at epoch {epoch}");
                    self.mark_stopped(session_id).await?;
                    return Ok(());
                }

                let batch_x = features.select(Axis(0), chunk);
                let batch_y = targets.select(Axis(0), chunk);
                let metrics = trainer.train_step(&batch_x, &batch_y)?;
                epoch_loss += metrics.loss;
                epoch_accuracy += metrics.accuracy;
                batches += 1;

                let completed = epoch * batches_per_epoch + batch_idx + 1;
                let elapsed = (Utc::now() - start).num_seconds();
                let fraction = completed as f64 / total_batches as f64;
                let remaining = if fraction > 0.0 {
                    ((1.0 - fraction) / fraction * elapsed as f64) as i64
                } else {
                    0
                };
                let progress = ProgressSnapshot {
                    epoch: epoch + 1,
                    batch: batch_idx + 1,
                    total_batches,
                    loss: metrics.loss,
                    accuracy: metrics.accuracy,
                    percentage: fraction * 100.0,
                    time_elapsed: elapsed,
                    estimated_time_remaining: remaining,
                };
                self.registry
                    .update_training_session(session_id, json!({"progress": progress}))
                    .await?;

                if !self.batch_pace.is_zero() {
                    sleep(self.batch_pace).await;
                } else {
                    tokio::task::yield_now().await;
                }
            }

            final_loss = epoch_loss / batches as f64;
            final_accuracy = epoch_accuracy / batches as f64;
            let validation = holdout
                .as_ref()
                .map(|(val_x, val_y)| trainer.evaluate(val_x, val_y));
            epoch_metrics.push(EpochMetric {
                epoch: epoch + 1,
                loss: final_loss,
                accuracy: final_accuracy,
                val_loss: validation.map(|m| m.loss),
                val_accuracy: validation.map(|m| m.accuracy),
                learning_rate: params.learning_rate,
                duration: (Utc::now() - epoch_start).num_milliseconds() as f64 / 1000.0,
                timestamp: Utc::now(),
            });
            self.registry
                .update_training_session(session_id, json!({"epochMetrics": epoch_metrics}))
                .await?;
            log::info!(
                "session {session_id}: epoch {}/{} loss {:.4} accuracy {:.4}",
                epoch + 1,
                params.epochs,
                final_loss,
                final_accuracy
            );
        }

        // a stop can land between the last batch and this point
        if *rx.borrow() == Control::Stop {
            log::info!("session {session_id}: stopped after final batch");
            self.mark_stopped(session_id).await?;
            return Ok(());
        }

        let parameters = trainer.parameters();
        let result = self.build_result(&params, &parameters, start, final_loss, final_accuracy);
        self.registry
            .update_training_session(
                session_id,
                json!({"status": "completed", "result": result}),
            )
            .await?;
        if !model_id.is_empty() {
            self.registry
                .update_model(&model_id, json!({"accuracy": final_accuracy * 100.0}))
                .await?;
        }
        log::info!("session {session_id}: completed with accuracy {final_accuracy:.4}");
        Ok(())
    }

    /// The stop handler writes the terminal status before signalling, but
    /// the runner's own startup write can land after it. Stop exits write
    /// the status again so the session cannot stay in "training".
    async fn mark_stopped(&self, session_id: &str) -> anyhow::Result<()> {
        self.registry
            .update_training_session(session_id, json!({"status": "stopped"}))
            .await?;
        Ok(())
    }

    fn build_result(
        &self,
        params: &TrainParams,
        parameters: &GradientMap,
        start: chrono::DateTime<Utc>,
        final_loss: f64,
        final_accuracy: f64,
    ) -> TrainingResult {
        let parameter_count: usize = parameters.values().map(|p| p.len()).sum();
        TrainingResult {
            model_type: params.model_type.clone(),
            final_loss,
            final_accuracy,
            training_time: (Utc::now() - start).num_seconds(),
            gradients: ai::gradient_map_to_json(parameters),
            stats: json!({
                "epochs": params.epochs,
                "batchSize": params.batch_size,
                "parameterCount": parameter_count,
            }),
            metadata: json!({
                "optimizer": params.optimizer,
                "learningRate": params.learning_rate,
                "hiddenSizes": params.hidden_sizes,
            }),
        }
    }

    /// Resolve the training data for a session: a stored dataset when the
    /// params reference one, otherwise a synthetic classification set.
    /// Dataset dimensions override the configured input and class counts.
    fn training_data(&self, params: &mut TrainParams) -> (Array2<f64>, Array2<f64>) {
        if let Some(cid) = params.dataset_cid.clone() {
            match self.load_stored_dataset(&cid) {
                Ok((features, targets)) => {
                    params.input_size = features.ncols();
                    params.num_classes = targets.ncols();
                    log::info!(
                        "training on dataset {cid}: {} samples, {} features, {} classes",
                        features.nrows(),
                        params.input_size,
                        params.num_classes
                    );
                    return (features, targets);
                }
                Err(e) => {
                    log::warn!("dataset {cid} unusable ({e}), falling back to synthetic data");
                }
            }
        }
        synthetic_dataset(SYNTHETIC_SAMPLES, params.input_size, params.num_classes)
    }

    fn load_stored_dataset(&self, cid: &str) -> anyhow::Result<(Array2<f64>, Array2<f64>)> {
        let bytes = self.blobs.download(cid)?;
        let content = String::from_utf8(bytes)?;
        let data_type = if content.trim_start().starts_with('[') {
            "json"
        } else {
            "csv"
        };
        Ok(load_dataset(&content, data_type)?)
    }
}

/// Block while paused; returns the signal that ended the wait. A closed
/// channel counts as a stop.
async fn wait_for_resume(rx: &mut watch::Receiver<Control>) -> Control {
    loop {
        let control = *rx.borrow_and_update();
        match control {
            Control::Run => return Control::Run,
            Control::Stop => return Control::Stop,
            Control::Pause => {
                if rx.changed().await.is_err() {
                    return Control::Stop;
                }
            }
        }
    }
}

/// Shuffle rows and carve off the validation fraction. A split that would
/// leave either side empty disables validation.
fn split_validation(
    features: Array2<f64>,
    targets: Array2<f64>,
    split: f64,
) -> (Array2<f64>, Array2<f64>, Option<(Array2<f64>, Array2<f64>)>) {
    let samples = features.nrows();
    let held_out = (samples as f64 * split.clamp(0.0, 1.0)).round() as usize;
    if held_out == 0 || held_out >= samples {
        return (features, targets, None);
    }
    let mut indices: Vec<usize> = (0..samples).collect();
    indices.shuffle(&mut rand::thread_rng());
    let (val_idx, train_idx) = indices.split_at(held_out);
    let validation = (
        features.select(Axis(0), val_idx),
        targets.select(Axis(0), val_idx),
    );
    (
        features.select(Axis(0), train_idx),
        targets.select(Axis(0), train_idx),
        Some(validation),
    )
}

/// Random features with uniformly random one-hot labels.
fn synthetic_dataset(samples: usize, input_size: usize, num_classes: usize) -> (Array2<f64>, Array2<f64>) {
    let features = Array2::random((samples, input_size), StandardNormal);
    let mut targets = Array2::zeros((samples, num_classes));
    let mut rng = rand::thread_rng();
    for i in 0..samples {
        let class = rng.gen_range(0..num_classes);
        targets[[i, class]] = 1.0;
    }
    (features, targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryDocumentStore, SessionStatus, TrainingSession};
    use tokio::time::timeout;

    fn runner() -> TrainingRunner {
        let registry = Registry::new(Arc::new(MemoryDocumentStore::new()));
        let config = Config {
            batch_pace_ms: 0,
            ..Config::default()
        };
        TrainingRunner::new(
            registry,
            Arc::new(BlobStore::new()),
            SessionControls::new(),
            &config,
        )
    }

    fn small_params() -> TrainParams {
        TrainParams {
            input_size: 8,
            hidden_sizes: vec![16],
            num_classes: 4,
            epochs: 1,
            batch_size: 256,
            optimizer: "sgd".to_string(),
            learning_rate: 0.01,
            ..TrainParams::default()
        }
    }

    async fn wait_for_terminal(runner: &TrainingRunner, session_id: &str) -> SessionStatus {
        for _ in 0..400 {
            if let Some(status) = runner.registry.session_status(session_id).await.unwrap() {
                if status.is_terminal() {
                    return status;
                }
            }
            sleep(Duration::from_millis(25)).await;
        }
        panic!("session {session_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn session_runs_to_completion() {
        let runner = runner();
        let session = TrainingSession::new(
            "run1".to_string(),
            "model_run1".to_string(),
            "tester".to_string(),
        );
        runner
            .registry
            .create_training_session(&session)
            .await
            .unwrap();
        runner
            .registry
            .create_model(&crate::db::ModelInfo::new(
                "model_run1".to_string(),
                "test model".to_string(),
                String::new(),
            ))
            .await
            .unwrap();

        runner.spawn("run1".to_string(), small_params());
        let status = timeout(Duration::from_secs(30), wait_for_terminal(&runner, "run1"))
            .await
            .unwrap();
        assert_eq!(status, SessionStatus::Completed);

        let doc = runner.registry.require_training_session("run1").await.unwrap();
        let result = doc.get("result").unwrap();
        assert!(result.get("finalLoss").unwrap().as_f64().unwrap().is_finite());
        assert!(result.get("gradients").unwrap().get("layer_0_weights").is_some());
        assert!(doc.get("end_time").is_some());

        // default 0.2 split holds out samples, so epochs carry val metrics
        let metrics = doc.get("epochMetrics").unwrap().as_array().unwrap();
        let val_loss = metrics[0].get("valLoss").unwrap().as_f64().unwrap();
        assert!(val_loss.is_finite());
        assert!(metrics[0].get("valAccuracy").is_some());
    }

    #[tokio::test]
    async fn stop_signal_ends_the_session() {
        let runner = runner();
        let session = TrainingSession::new(
            "run2".to_string(),
            "model_run2".to_string(),
            "tester".to_string(),
        );
        runner
            .registry
            .create_training_session(&session)
            .await
            .unwrap();

        let mut params = small_params();
        params.epochs = 50;
        params.batch_size = 16;
        runner.spawn("run2".to_string(), params);

        // park the loop so the session cannot finish under us, then stop it
        // the way the API handler does
        assert!(runner.controls.signal("run2", Control::Pause));
        sleep(Duration::from_millis(50)).await;
        runner
            .registry
            .update_training_session("run2", json!({"status": "stopped"}))
            .await
            .unwrap();
        assert!(runner.controls.signal("run2", Control::Stop));

        let status = timeout(Duration::from_secs(30), wait_for_terminal(&runner, "run2"))
            .await
            .unwrap();
        assert_eq!(status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn stop_racing_the_startup_write_still_ends_stopped() {
        let runner = runner();
        let session = TrainingSession::new(
            "run3".to_string(),
            "model_run3".to_string(),
            "tester".to_string(),
        );
        runner
            .registry
            .create_training_session(&session)
            .await
            .unwrap();

        // handler side lands first: terminal status written, stop signalled
        let rx = runner.controls.register("run3");
        runner
            .registry
            .update_training_session("run3", json!({"status": "stopped"}))
            .await
            .unwrap();
        runner.controls.signal("run3", Control::Stop);

        // the runner then overwrites the status at startup and must put the
        // terminal state back on its way out
        runner.run("run3", small_params(), rx).await.unwrap();
        let status = runner.registry.session_status("run3").await.unwrap();
        assert_eq!(status, Some(SessionStatus::Stopped));
        let doc = runner.registry.require_training_session("run3").await.unwrap();
        assert!(doc.get("end_time").is_some());
    }

    #[test]
    fn validation_split_carves_out_a_holdout() {
        let features = Array2::zeros((10, 3));
        let targets = Array2::zeros((10, 2));
        let (train_x, train_y, holdout) = split_validation(features, targets, 0.2);
        assert_eq!(train_x.nrows(), 8);
        assert_eq!(train_y.nrows(), 8);
        let (val_x, val_y) = holdout.unwrap();
        assert_eq!(val_x.nrows(), 2);
        assert_eq!(val_y.nrows(), 2);

        // degenerate splits disable validation
        let (x, _, holdout) = split_validation(Array2::zeros((3, 2)), Array2::zeros((3, 2)), 0.0);
        assert_eq!(x.nrows(), 3);
        assert!(holdout.is_none());
        let (_, _, holdout) = split_validation(Array2::zeros((3, 2)), Array2::zeros((3, 2)), 1.0);
        assert!(holdout.is_none());
    }

    #[tokio::test]
    async fn paused_session_waits_for_resume() {
        let mut rx = {
            let controls = SessionControls::new();
            let rx = controls.register("s");
            controls.signal("s", Control::Pause);
            rx
        };
        // sender dropped with the controls map, so the wait resolves to Stop
        assert_eq!(wait_for_resume(&mut rx).await, Control::Stop);

        let controls = SessionControls::new();
        let mut rx = controls.register("s");
        controls.signal("s", Control::Pause);
        let waiter = tokio::spawn(async move { wait_for_resume(&mut rx).await });
        sleep(Duration::from_millis(20)).await;
        controls.signal("s", Control::Run);
        assert_eq!(waiter.await.unwrap(), Control::Run);
    }
}
