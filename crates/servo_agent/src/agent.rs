//! The command loop.
//!
//! Strictly sequential: fetch the next command, run the preflight when asked
//! for, dispatch to a handler, post the result, pause, repeat. Per-command
//! failures become failure result events; only signals and an EXIT command
//! end the loop.

use serde_json::{json, Value};
use servo_protocol::defaults;
use servo_protocol::{Command, CommandEnvelope, Event, StopMode};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::Config;
use crate::driver::DriverRunner;
use crate::error::ApiError;
use crate::ops::Operations;
use crate::progress::ProgressReporter;
use crate::signals::StopFlag;

pub struct Agent {
    config: Config,
    api: ApiClient,
    runner: DriverRunner,
    stop: StopFlag,
}

impl Agent {
    pub fn new(config: Config, stop: StopFlag) -> Self {
        let api = ApiClient::new(&config);
        let runner = DriverRunner::new(&config);
        Self {
            config,
            api,
            runner,
            stop,
        }
    }

    /// Announce the agent to the service. Retries forever; there is nothing
    /// useful to do until the service knows we exist.
    pub async fn hello(&mut self) -> Result<(), ApiError> {
        let param = json!({ "agent": self.config.agent_id });
        self.api.post(Event::Hello, param, None, true).await?;
        info!(agent = %self.config.agent_id, app = %self.config.app_id, "session started");
        Ok(())
    }

    /// Sign off. Bounded retries; a dying agent must not hang on a flaky
    /// network.
    pub async fn goodbye(&mut self) {
        match self
            .api
            .post(
                Event::Goodbye,
                Value::Null,
                Some(defaults::GOODBYE_RETRIES),
                true,
            )
            .await
        {
            Ok(_) => info!("GOODBYE acknowledged"),
            Err(err) => warn!("GOODBYE not delivered: {err}"),
        }
    }

    /// Poll for commands until a stop is requested. Returns how to end.
    pub async fn run(&mut self) -> Result<StopMode, ApiError> {
        loop {
            if let Some(mode) = self.stop.get() {
                info!(mode = mode.as_str(), "stop requested; leaving the command loop");
                return Ok(mode);
            }

            let next = self.api.post(Event::WhatsNext, Value::Null, None, true).await?;
            let envelope: CommandEnvelope = match serde_json::from_value(next) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!("unintelligible WHATS_NEXT response: {err}");
                    tokio::time::sleep(self.config.retry_delay).await;
                    continue;
                }
            };
            let Some(command) = envelope.command() else {
                warn!("service response carried no command; polling again");
                tokio::time::sleep(self.config.retry_delay).await;
                continue;
            };
            let param = envelope.param.unwrap_or(Value::Null);
            info!(cmd = command.as_str(), "command received");

            match &command {
                Command::Sleep => self.sleep(&param).await,
                Command::Exit => {
                    info!("EXIT command received");
                    return Ok(StopMode::Exit);
                }
                Command::Describe | Command::Measure | Command::Adjust => {
                    if let Some(event) = command.result_event() {
                        self.execute(&command, event, &param).await?;
                    }
                }
                Command::Other(name) => warn!(cmd = %name, "unknown command; skipping"),
            }

            if let Some(mode) = self.stop.get() {
                info!(mode = mode.as_str(), "stop requested; leaving the command loop");
                return Ok(mode);
            }
            self.pause().await;
        }
    }

    /// Run one result-bearing command and post exactly one terminal event
    /// for it.
    async fn execute(
        &mut self,
        command: &Command,
        event: Event,
        param: &Value,
    ) -> Result<(), ApiError> {
        let ops = Operations {
            runner: &self.runner,
            drivers: &self.config.drivers,
            app_id: &self.config.app_id,
            perf_expr: self.config.perf_expr.as_deref(),
        };

        if environment_requested(param) {
            debug!("running environment preflight");
            if let Err(err) = ops.environment(param).await {
                warn!("environment preflight failed: {err}");
                let mut result = err.result_param();
                result["status"] = json!("environment-mismatch");
                self.api.post(event, result, None, true).await?;
                return Ok(());
            }
        }

        let outcome = match command {
            Command::Describe => ops.describe().await.map(|descriptor| {
                json!({ "descriptor": descriptor, "status": "ok" })
            }),
            Command::Measure => {
                let mut reporter = ProgressReporter::new(&mut self.api, event);
                ops.measure(param, &mut reporter).await.map(|mut result| {
                    result["status"] = json!("ok");
                    result
                })
            }
            Command::Adjust => {
                let mut reporter = ProgressReporter::new(&mut self.api, event);
                ops.adjust(param, &mut reporter).await
            }
            _ => return Ok(()),
        };

        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!(event = event.as_str(), "operation failed: {err}");
                err.result_param()
            }
        };
        self.api.post(event, result, None, true).await?;
        Ok(())
    }

    async fn sleep(&self, param: &Value) {
        if self.config.interactive {
            info!("interactive mode; ignoring SLEEP");
            return;
        }
        let duration = sleep_duration(param);
        info!("sleeping for {:?}", duration);
        tokio::time::sleep(duration).await;
    }

    /// Inter-command pause: a fixed delay, or a prompt in interactive mode.
    async fn pause(&self) {
        if self.config.interactive {
            print!("servo: press Enter for the next command... ");
            let _ = std::io::Write::flush(&mut std::io::stdout());
            let mut line = String::new();
            let mut reader = BufReader::new(tokio::io::stdin());
            let _ = reader.read_line(&mut line).await;
        } else if let Some(delay) = self.config.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn environment_requested(param: &Value) -> bool {
    param
        .get("control")
        .and_then(|control| control.get("environment"))
        .map_or(false, |environment| !environment.is_null())
}

fn sleep_duration(param: &Value) -> Duration {
    param
        .get("duration")
        .and_then(|duration| {
            duration
                .as_u64()
                .or_else(|| duration.as_f64().map(|secs| secs.max(0.0) as u64))
        })
        .map(Duration::from_secs)
        .unwrap_or(defaults::DEFAULT_SLEEP)
}
