//! Operator console
//!
//! Line-oriented commands read from stdin (or any async reader in tests).
//! This is the producer side of the station: operators queue tasks here and
//! trigger dispatch passes.
//!
//! ```text
//! add <name> <payoff> <r1,r2,...>   queue a task (1)
//! dispatch                          run a dispatch pass (2)
//! tasks                             list pending tasks (3)
//! workers                           list connected workers
//! resources                         show the resource index
//! metrics                           print prometheus metrics
//! help                              show this list
//! quit                              stop the ground station (4)
//! ```
//!
//! `add` (or `1`) without arguments prompts for each field.

use crate::dispatch::DispatchReport;
use crate::station::GroundStation;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tracing::{info, warn};
use uplink_common::error::{Result, UplinkError};
use uplink_common::METRICS;
use uplink_proto::Task;

const HELP: &str = "\
Commands:
  add <name> <payoff> <r1,r2,...>   queue a task (1)
  dispatch                          run a dispatch pass (2)
  tasks                             list pending tasks (3)
  workers                           list connected workers
  resources                         show the resource index
  metrics                           print prometheus metrics
  help                              show this list
  quit                              stop the ground station (4)
";

/// One console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Queue a fully specified task
    Add(Task),

    /// Queue a task, prompting for its fields
    AddInteractive,

    Dispatch,
    Tasks,
    Workers,
    Resources,
    Metrics,
    Help,
    Quit,

    /// Blank line
    Empty,
}

impl Command {
    /// Parse one input line
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            return Ok(Command::Empty);
        };
        let args: Vec<&str> = words.collect();

        let command = match keyword.to_ascii_lowercase().as_str() {
            "add" | "1" => match args.as_slice() {
                [] => Command::AddInteractive,
                [name, payoff, resources @ ..] if !resources.is_empty() => {
                    Command::Add(Task::parse(name, payoff, &resources.join(""))?)
                }
                _ => {
                    return Err(UplinkError::Parse(
                        "usage: add <name> <payoff> <r1,r2,...>".to_string(),
                    ))
                }
            },
            "dispatch" | "2" => Command::Dispatch,
            "tasks" | "3" => Command::Tasks,
            "quit" | "exit" | "4" => Command::Quit,
            "workers" => Command::Workers,
            "resources" => Command::Resources,
            "metrics" => Command::Metrics,
            "help" | "?" => Command::Help,
            other => return Err(UplinkError::Parse(format!("unknown command '{}'", other))),
        };
        Ok(command)
    }
}

/// Interactive front end to a [`GroundStation`]
pub struct Console<R, W> {
    station: Arc<GroundStation>,
    input: Lines<BufReader<R>>,
    output: W,
    metrics_enabled: bool,
}

impl<R, W> Console<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a console reading commands from `input`
    pub fn new(station: Arc<GroundStation>, input: R, output: W) -> Self {
        Self {
            station,
            input: BufReader::new(input).lines(),
            output,
            metrics_enabled: true,
        }
    }

    /// Whether the `metrics` command prints the registry
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Process commands until `quit` or end of input
    pub async fn run(&mut self) -> Result<()> {
        self.write(HELP).await?;

        loop {
            self.write("> ").await?;
            let Some(line) = self.input.next_line().await? else {
                info!("Console input closed");
                return Ok(());
            };

            match Command::parse(&line) {
                Ok(Command::Quit) => {
                    info!("Quit requested from console");
                    return Ok(());
                }
                Ok(command) => self.execute(command).await?,
                Err(e) => {
                    warn!("Console: {}", e);
                    self.write(&format!("{}\n", e)).await?;
                }
            }
        }
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Add(task) => self.submit(task).await,
            Command::AddInteractive => match self.prompt_task().await? {
                Some(task) => self.submit(task).await,
                None => Ok(()),
            },
            Command::Dispatch => {
                let report = self.station.dispatch();
                self.write(&render_report(&report)).await
            }
            Command::Tasks => {
                let tasks = self.station.pending_tasks();
                if tasks.is_empty() {
                    return self.write("No pending tasks\n").await;
                }
                let mut out = String::new();
                for task in tasks {
                    out.push_str(&format!("{} score={:.2}\n", task, task.score()));
                }
                self.write(&out).await
            }
            Command::Workers => {
                let workers = self.station.workers();
                if workers.is_empty() {
                    return self.write("No connected workers\n").await;
                }
                let mut out = String::new();
                for worker in workers {
                    let resources: Vec<&str> =
                        worker.declared_resources.iter().map(String::as_str).collect();
                    let tasks: Vec<&str> = worker.assigned_tasks.iter().map(Task::name).collect();
                    out.push_str(&format!(
                        "{} {} {} resources=[{}] tasks=[{}]\n",
                        worker.id,
                        worker.address,
                        worker.state,
                        resources.join(","),
                        tasks.join(",")
                    ));
                }
                self.write(&out).await
            }
            Command::Resources => {
                let snapshot = self.station.resource_snapshot();
                if snapshot.is_empty() {
                    return self.write("No resources available\n").await;
                }
                let mut out = String::new();
                for (resource, workers) in snapshot {
                    let workers: Vec<String> = workers.iter().map(|w| w.to_string()).collect();
                    out.push_str(&format!("{}: {}\n", resource, workers.join(", ")));
                }
                self.write(&out).await
            }
            Command::Metrics => {
                if !self.metrics_enabled {
                    return self.write("Metrics are disabled\n").await;
                }
                let text = METRICS.gather();
                self.write(&text).await
            }
            Command::Help => self.write(HELP).await,
            Command::Quit | Command::Empty => Ok(()),
        }
    }

    async fn submit(&mut self, task: Task) -> Result<()> {
        let name = task.name().to_string();
        match self.station.submit_task(task) {
            Ok(()) => self.write(&format!("Task {} queued\n", name)).await,
            Err(e) => {
                warn!("Console: task {} rejected: {}", name, e);
                self.write(&format!("Task {} rejected: {}\n", name, e)).await
            }
        }
    }

    /// Ask for name, payoff and resources; `None` if input ends or a field is invalid
    async fn prompt_task(&mut self) -> Result<Option<Task>> {
        let mut fields = Vec::with_capacity(3);
        for prompt in ["Task name: ", "Task payoff: ", "Task resources (comma separated): "] {
            self.write(prompt).await?;
            match self.input.next_line().await? {
                Some(line) => fields.push(line.trim().to_string()),
                None => return Ok(None),
            }
        }

        match Task::parse(&fields[0], &fields[1], &fields[2]) {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                self.write(&format!("Invalid task: {}\n", e)).await?;
                Ok(None)
            }
        }
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }
}

/// Human-readable summary of a dispatch pass
pub fn render_report(report: &DispatchReport) -> String {
    let mut out = String::new();
    for assignment in &report.assignments {
        out.push_str(&format!(
            "{} -> {}\n",
            assignment.task.name(),
            assignment.worker
        ));
    }
    for task in &report.unassigned {
        out.push_str(&format!("{} -> no available worker\n", task.name()));
    }
    for worker in &report.unreachable {
        out.push_str(&format!("{} dropped (unreachable)\n", worker));
    }
    out.push_str(&format!("Total payoff: {}\n", report.total_payoff));
    out
}
