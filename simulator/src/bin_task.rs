use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rumqttc::{AsyncClient, QoS};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actuator::{emptying_sequence, ActuatorState};
use crate::sensor::{BinStatus, FillSensor};

/// Command from a bin's sensor loop to its actuator loop.
#[derive(Debug, Clone, Copy)]
pub enum ActuatorCommand {
    Empty,
}

/// Per-bin tunables shared by both tasks.
#[derive(Debug, Clone)]
pub struct BinSettings {
    pub bin_id: String,
    pub base_topic: String,
    pub interval: Duration,
    pub fill_rate: f64,
    pub fill_threshold: f64,
    pub empty_threshold: f64,
    pub error_rate: f64,
}

impl BinSettings {
    fn topic(&self, kind: &str) -> String {
        format!("{}/{}/{}", self.base_topic, self.bin_id, kind)
    }
}

/// Drives the fill sensor: publishes level and status every interval and
/// requests emptying once the fill threshold is reached. When the actuator
/// settles back to IDLE, the bin has been emptied and the sensor resets.
pub async fn sensor_task(
    settings: BinSettings,
    client: AsyncClient,
    cmd_tx: mpsc::Sender<ActuatorCommand>,
    mut state_rx: watch::Receiver<ActuatorState>,
    cancel: CancellationToken,
) {
    let mut sensor = FillSensor::new(settings.fill_rate);
    let mut ticker = tokio::time::interval(settings.interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(level) = sensor.tick() else { continue };
                publish_level(&settings, &client, level).await;

                if level >= settings.fill_threshold && *state_rx.borrow() == ActuatorState::Idle {
                    info!(
                        "Bin {} reached {:.1}% - automatically emptying",
                        settings.bin_id, level
                    );
                    if cmd_tx.try_send(ActuatorCommand::Empty).is_err() {
                        warn!("Bin {} empty command dropped, actuator busy", settings.bin_id);
                    }
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                if state == ActuatorState::Idle {
                    sensor.reset();
                    info!("Bin {} emptied", settings.bin_id);
                    publish_level(&settings, &client, sensor.level()).await;
                }
            }
        }
    }
}

async fn publish_level(settings: &BinSettings, client: &AsyncClient, level: f64) {
    let payload = format!("{:.1}", level);
    if let Err(e) = client
        .publish(settings.topic("fill_level"), QoS::AtMostOnce, false, payload)
        .await
    {
        warn!("Bin {} failed to publish fill level: {}", settings.bin_id, e);
    }

    let status = BinStatus::for_level(level, settings.fill_threshold, settings.empty_threshold);
    if let Err(e) = client
        .publish(settings.topic("status"), QoS::AtMostOnce, false, status.to_string())
        .await
    {
        warn!("Bin {} failed to publish status: {}", settings.bin_id, e);
    }
}

/// Drives the lid actuator: waits for empty commands and walks through the
/// emptying cycle, publishing every state transition. A failed cycle leaves
/// the actuator in ERROR, where it refuses further commands.
pub async fn actuator_task(
    settings: BinSettings,
    client: AsyncClient,
    mut cmd_rx: mpsc::Receiver<ActuatorCommand>,
    state_tx: watch::Sender<ActuatorState>,
    cancel: CancellationToken,
) {
    let mut rng = StdRng::from_entropy();
    let mut state = ActuatorState::Idle;

    // Announce the power-on state before accepting commands.
    set_state(&settings, &client, &state_tx, &mut state, ActuatorState::Idle).await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = cmd_rx.recv() => {
                let Some(ActuatorCommand::Empty) = cmd else { break };
                if state != ActuatorState::Idle {
                    warn!("Bin {} cannot empty: actuator is {}", settings.bin_id, state);
                    continue;
                }
                run_emptying_cycle(&settings, &client, &state_tx, &mut state, &mut rng, &cancel)
                    .await;
            }
        }
    }
}

async fn run_emptying_cycle(
    settings: &BinSettings,
    client: &AsyncClient,
    state_tx: &watch::Sender<ActuatorState>,
    state: &mut ActuatorState,
    rng: &mut StdRng,
    cancel: &CancellationToken,
) {
    info!("Bin {} starting emptying cycle", settings.bin_id);

    let error_rate = settings.error_rate.clamp(0.0, 1.0);
    let fail_at = if error_rate > 0.0 && rng.gen_bool(error_rate) {
        Some(rng.gen_range(0..3))
    } else {
        None
    };

    for (index, (phase, dwell)) in emptying_sequence().into_iter().enumerate() {
        set_state(settings, client, state_tx, state, phase).await;
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(dwell) => {}
        }
        if fail_at == Some(index) {
            set_state(settings, client, state_tx, state, ActuatorState::Error).await;
            warn!("Bin {} actuator jammed while {}", settings.bin_id, phase);
            return;
        }
    }

    set_state(settings, client, state_tx, state, ActuatorState::Idle).await;
    info!("Bin {} emptying cycle complete", settings.bin_id);
}

async fn set_state(
    settings: &BinSettings,
    client: &AsyncClient,
    state_tx: &watch::Sender<ActuatorState>,
    state: &mut ActuatorState,
    next: ActuatorState,
) {
    *state = next;
    let _ = state_tx.send(next);
    if let Err(e) = client
        .publish(settings.topic("actuator_state"), QoS::AtMostOnce, false, next.to_string())
        .await
    {
        warn!("Bin {} failed to publish actuator state: {}", settings.bin_id, e);
    }
}
