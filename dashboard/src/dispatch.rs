//! Command dispatch against single devices.
//!
//! A [`CommandDispatcher`] carries at most one outstanding command. Its state is
//! published through a [`watch`] channel so UI surfaces can follow
//! `Idle → Sending → Succeeded | Failed` without polling.

use alloc::sync::Arc;
use core::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleetpulse_common::{Command, CommandResult, DeviceStatus};

/// Posts a command to the device backend.
pub trait CommandTransport: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the command could not be delivered at all. A device that
    /// received the command but refused it answers `Ok` with `success: false`.
    fn post_command(&self, command: Command) -> BoxFuture<'_, eyre::Result<CommandResult>>;
}

/// Last known status of a device, as seen by whoever feeds the dispatcher.
pub trait DeviceStatusLookup: Send + Sync {
    /// `None` when the device is unknown.
    fn status_of(&self, device_id: &str) -> Option<DeviceStatus>;
}

/// Why a command failed after it was handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Failure {
    /// The device side answered `success: false`.
    DeviceRejected { message: String, command_id: String },
    /// The transport itself failed.
    Transport { message: String, cause: String },
}

impl Failure {
    #[must_use]
    pub fn message(&self) -> &str {
        match *self {
            Self::DeviceRejected { ref message, .. } | Self::Transport { ref message, .. } => {
                message
            }
        }
    }
}

/// Message shown for any transport level failure.
pub const TRANSPORT_FAILURE_MESSAGE: &str = "Failed to send command";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DispatchState {
    #[default]
    Idle,
    Sending { device_id: String, command_name: String },
    Succeeded { message: String, command_id: String },
    Failed(Failure),
}

impl DispatchState {
    #[must_use]
    pub const fn is_sending(&self) -> bool {
        matches!(*self, Self::Sending { .. })
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(*self, Self::Succeeded { .. } | Self::Failed(_))
    }
}

/// A `send` refused before anything reached the transport.
#[derive(Debug, Clone, PartialEq, Eq, ThisError, Serialize, Deserialize)]
#[serde(tag = "reason", content = "deviceId", rename_all = "camelCase")]
pub enum GuardRejection {
    #[error("A command is already being sent")]
    Busy,
    #[error("Device {0} is not known")]
    UnknownDevice(String),
    #[error("Device {0} is offline")]
    DeviceOffline(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing was sent and the dispatcher state did not change.
    Rejected(GuardRejection),
    Succeeded { message: String, command_id: String },
    Failed(Failure),
}

impl SendOutcome {
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(*self, Self::Rejected(_))
    }
}

/// Resets a dispatcher stuck in `Sending` if the `send` future is dropped mid-flight.
struct InFlight<'dispatcher> {
    state: &'dispatcher watch::Sender<DispatchState>,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(mut self, state: DispatchState) {
        self.settled = true;
        self.state.send_replace(state);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Command send was cancelled before the transport answered");
            self.state.send_replace(DispatchState::Failed(Failure::Transport {
                message: TRANSPORT_FAILURE_MESSAGE.to_string(),
                cause: "send cancelled".to_string(),
            }));
        }
    }
}

/// Issues commands with the guarantee that none reaches an unknown, offline or busy target.
pub struct CommandDispatcher {
    transport: Arc<dyn CommandTransport>,
    lookup: Arc<dyn DeviceStatusLookup>,
    state: watch::Sender<DispatchState>,
}

impl fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl CommandDispatcher {
    #[must_use]
    pub fn new(transport: Arc<dyn CommandTransport>, lookup: Arc<dyn DeviceStatusLookup>) -> Self {
        let (state, _) = watch::channel(DispatchState::Idle);
        Self {
            transport,
            lookup,
            state,
        }
    }

    #[must_use]
    pub fn state(&self) -> DispatchState {
        self.state.borrow().clone()
    }

    /// Follow state changes of this dispatcher.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DispatchState> {
        self.state.subscribe()
    }

    /// Return to `Idle` once a UI has shown the terminal state. Returns whether anything changed.
    pub fn acknowledge(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                *state = DispatchState::Idle;
                true
            } else {
                false
            }
        })
    }

    /// Check the guards and move to `Sending` in one step.
    fn begin(&self, command: &Command) -> Result<(), GuardRejection> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| {
            if state.is_sending() {
                outcome = Err(GuardRejection::Busy);
                return false;
            }
            match self.lookup.status_of(&command.device_id) {
                None => {
                    outcome = Err(GuardRejection::UnknownDevice(command.device_id.clone()));
                    false
                }
                Some(DeviceStatus::Offline) => {
                    outcome = Err(GuardRejection::DeviceOffline(command.device_id.clone()));
                    false
                }
                Some(DeviceStatus::Online) => {
                    *state = DispatchState::Sending {
                        device_id: command.device_id.clone(),
                        command_name: command.command_name.clone(),
                    };
                    true
                }
            }
        });
        outcome
    }

    /// Send `command` unless a guard rejects it, and settle on the transport's answer.
    #[tracing::instrument(skip_all, fields(device_id = %command.device_id, command = %command.command_name))]
    pub async fn send(&self, command: Command) -> SendOutcome {
        if let Err(rejection) = self.begin(&command) {
            debug!(%rejection, "Command rejected");
            return SendOutcome::Rejected(rejection);
        }
        let in_flight = InFlight {
            state: &self.state,
            settled: false,
        };

        info!("Sending command");
        let (state, outcome) = match self.transport.post_command(command).await {
            Ok(CommandResult {
                success: true,
                message,
                command_id,
            }) => {
                info!(%command_id, "Command accepted");
                (
                    DispatchState::Succeeded {
                        message: message.clone(),
                        command_id: command_id.clone(),
                    },
                    SendOutcome::Succeeded {
                        message,
                        command_id,
                    },
                )
            }
            Ok(CommandResult {
                message,
                command_id,
                ..
            }) => {
                warn!(%command_id, %message, "Device rejected command");
                let failure = Failure::DeviceRejected {
                    message,
                    command_id,
                };
                (
                    DispatchState::Failed(failure.clone()),
                    SendOutcome::Failed(failure),
                )
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "Command transport failed");
                let failure = Failure::Transport {
                    message: TRANSPORT_FAILURE_MESSAGE.to_string(),
                    cause: format!("{err:#}"),
                };
                (
                    DispatchState::Failed(failure.clone()),
                    SendOutcome::Failed(failure),
                )
            }
        };
        in_flight.settle(state);
        outcome
    }
}
