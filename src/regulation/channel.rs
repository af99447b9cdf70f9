//! Messages between the override console and the regulation loop task.
//!
//! The loop task is the only writer of controller and actuator state; the
//! console sends a [`RegulationRequest`] and waits on the oneshot reply.

use super::RegulationStatus;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegulationError {
    #[error("manual commands are only accepted while the loop is paused")]
    NotPaused,
    #[error("fan duty must be within 0..=100 (got {0})")]
    InvalidFanDuty(u8),
    #[error("regulation loop is not running")]
    LoopStopped,
}

/// A request sent from the console to the loop task.
#[derive(Debug)]
pub enum RegulationRequest {
    /// Current loop state.
    Status {
        respond_to: oneshot::Sender<RegulationStatus>,
    },
    /// Stop deciding and actuating; actuators keep their last command.
    Pause {
        respond_to: oneshot::Sender<Result<(), RegulationError>>,
    },
    /// Hand control back to the loop.
    Resume {
        respond_to: oneshot::Sender<Result<(), RegulationError>>,
    },
    SetRelay {
        energized: bool,
        respond_to: oneshot::Sender<Result<(), RegulationError>>,
    },
    SetFan {
        percent: u8,
        respond_to: oneshot::Sender<Result<(), RegulationError>>,
    },
}

/// Console side of the request channel.
#[derive(Debug, Clone)]
pub struct RegulationHandle {
    tx: mpsc::Sender<RegulationRequest>,
}

/// Create a request channel; the receiver goes to `RegulationLoop::run`.
pub fn channel(capacity: usize) -> (RegulationHandle, mpsc::Receiver<RegulationRequest>) {
    let (tx, rx) = mpsc::channel(capacity);
    (RegulationHandle { tx }, rx)
}

impl RegulationHandle {
    pub async fn status(&self) -> Result<RegulationStatus, RegulationError> {
        let (respond_to, rx) = oneshot::channel();
        self.send(RegulationRequest::Status { respond_to }).await?;
        rx.await.map_err(|_| RegulationError::LoopStopped)
    }

    pub async fn pause(&self) -> Result<(), RegulationError> {
        let (respond_to, rx) = oneshot::channel();
        self.send(RegulationRequest::Pause { respond_to }).await?;
        rx.await.map_err(|_| RegulationError::LoopStopped)?
    }

    pub async fn resume(&self) -> Result<(), RegulationError> {
        let (respond_to, rx) = oneshot::channel();
        self.send(RegulationRequest::Resume { respond_to }).await?;
        rx.await.map_err(|_| RegulationError::LoopStopped)?
    }

    pub async fn set_relay(&self, energized: bool) -> Result<(), RegulationError> {
        let (respond_to, rx) = oneshot::channel();
        self.send(RegulationRequest::SetRelay { energized, respond_to }).await?;
        rx.await.map_err(|_| RegulationError::LoopStopped)?
    }

    pub async fn set_fan(&self, percent: u8) -> Result<(), RegulationError> {
        let (respond_to, rx) = oneshot::channel();
        self.send(RegulationRequest::SetFan { percent, respond_to }).await?;
        rx.await.map_err(|_| RegulationError::LoopStopped)?
    }

    async fn send(&self, request: RegulationRequest) -> Result<(), RegulationError> {
        self.tx.send(request).await.map_err(|_| RegulationError::LoopStopped)
    }
}
