//! wfxctl - command-line client for wfx
//!
//! Talks to the northbound (management) API by default; status updates and
//! event subscriptions can be sent through the southbound (client) API to
//! act as a device.

mod stream;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use reqwest::{Client, RequestBuilder, Url};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use stream::{Backoff, ErrorBody};

const BASE_PATH: &str = "/api/wfx/v1";

/// wfxctl - manage workflows and jobs on a wfx server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Northbound (management) URL
    #[arg(long, default_value = "http://localhost:8081", env = "WFX_NORTH_URL")]
    north: String,

    /// Southbound (client) URL
    #[arg(long, default_value = "http://localhost:8080", env = "WFX_SOUTH_URL")]
    south: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that both listeners are up
    Health,

    /// Workflow commands
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },

    /// Job commands
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Subcommand, Debug)]
enum WorkflowCommands {
    /// Create a workflow from a JSON file
    Create {
        /// Workflow definition file
        file: PathBuf,
    },

    /// Get a workflow
    Get { name: String },

    /// List workflows
    Query {
        #[command(flatten)]
        page: PageArgs,
    },

    /// Delete a workflow
    Delete { name: String },
}

#[derive(Subcommand, Debug)]
enum JobCommands {
    /// Create a job
    Create {
        /// Workflow name
        #[arg(long)]
        workflow: String,

        #[arg(long)]
        client_id: String,

        /// Comma separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Job definition as a JSON string
        #[arg(long)]
        definition: Option<String>,

        /// Initial state, required when the workflow has several
        #[arg(long)]
        state: Option<String>,
    },

    /// Get a job
    Get {
        id: String,

        /// Include the status history
        #[arg(long)]
        history: bool,
    },

    /// Query jobs
    Query {
        #[arg(long)]
        client_id: Option<String>,

        #[arg(long)]
        state: Option<String>,

        #[arg(long)]
        workflow: Option<String>,

        /// Match jobs with any of these tags
        #[arg(long, value_delimiter = ',')]
        tag: Vec<String>,

        /// Match jobs in any of these groups
        #[arg(long, value_delimiter = ',')]
        group: Vec<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Delete a job
    Delete { id: String },

    /// Get the current status of a job
    GetStatus { id: String },

    /// Request a status change
    UpdateStatus {
        id: String,

        #[arg(long)]
        state: String,

        #[arg(long)]
        progress: Option<u8>,

        #[arg(long)]
        message: Option<String>,

        /// Side to act as; selects the listener the update is sent to
        #[arg(long, value_enum, default_value_t = Actor::Client)]
        actor: Actor,
    },

    /// Add tags to a job
    AddTags {
        id: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Remove tags from a job
    DelTags {
        id: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Follow job events
    Events {
        #[arg(long, value_delimiter = ',')]
        job_ids: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        client_ids: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        workflows: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Event actions, e.g. CREATE,UPDATE_STATUS
        #[arg(long, value_delimiter = ',')]
        actions: Vec<String>,

        /// Give up after this many consecutive failed reconnects
        #[arg(long)]
        max_retries: Option<u32>,

        #[arg(long, value_enum, default_value_t = Actor::Client)]
        actor: Actor,
    },
}

#[derive(ClapArgs, Debug)]
struct PageArgs {
    #[arg(long)]
    offset: Option<i64>,

    #[arg(long)]
    limit: Option<i64>,

    /// asc or desc
    #[arg(long)]
    sort: Option<String>,
}

impl PageArgs {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(offset) = self.offset {
            query.push(("offset", offset.to_string()));
        }
        if let Some(limit) = self.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(sort) = &self.sort {
            query.push(("sort", sort.clone()));
        }
        query
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Actor {
    Wfx,
    Client,
}

impl Cli {
    fn url(&self, actor: Actor, path: &str) -> String {
        let base = match actor {
            Actor::Wfx => &self.north,
            Actor::Client => &self.south,
        };
        format!("{}{}{}", base.trim_end_matches('/'), BASE_PATH, path)
    }

    fn north_url(&self, path: &str) -> String {
        self.url(Actor::Wfx, path)
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = Client::new();

    let result = match &cli.command {
        Commands::Health => handle_health(&client, &cli).await,
        Commands::Workflow { command } => handle_workflow(&client, &cli, command).await,
        Commands::Job { command } => handle_job(&client, &cli, command).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        process::exit(1);
    }
}

/// Send a request and return its JSON body, turning error payloads into errors
async fn send(request: RequestBuilder) -> anyhow::Result<Value> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        if body.is_empty() {
            return Ok(Value::Null);
        }
        return Ok(serde_json::from_str(&body)?);
    }

    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) => {
            let details: Vec<String> = err
                .errors
                .iter()
                .map(|e| format!("{} ({})", e.message, e.code))
                .collect();
            anyhow::bail!("{}: {}", status, details.join("; "))
        }
        Err(_) => anyhow::bail!("request failed with status {}", status),
    }
}

fn print(value: &Value) -> anyhow::Result<()> {
    if !value.is_null() {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

async fn handle_health(client: &Client, cli: &Cli) -> anyhow::Result<()> {
    let mut healthy = true;
    for (side, base) in [("northbound", &cli.north), ("southbound", &cli.south)] {
        let url = format!("{}/health", base.trim_end_matches('/'));
        match send(client.get(&url)).await {
            Ok(body) => println!("{}: {}", side, body["status"].as_str().unwrap_or("unknown")),
            Err(e) => {
                println!("{}: {:#}", side, e);
                healthy = false;
            }
        }
    }

    if !healthy {
        anyhow::bail!("wfx is not healthy");
    }
    Ok(())
}

async fn handle_workflow(
    client: &Client,
    cli: &Cli,
    command: &WorkflowCommands,
) -> anyhow::Result<()> {
    let response = match command {
        WorkflowCommands::Create { file } => {
            let content = std::fs::read_to_string(file)?;
            let workflow: Value = serde_json::from_str(&content)?;
            info!(file = %file.display(), "Creating workflow");
            send(client.post(cli.north_url("/workflows")).json(&workflow)).await?
        }
        WorkflowCommands::Get { name } => {
            send(client.get(cli.north_url(&format!("/workflows/{}", name)))).await?
        }
        WorkflowCommands::Query { page } => {
            send(client.get(cli.north_url("/workflows")).query(&page.query())).await?
        }
        WorkflowCommands::Delete { name } => {
            send(client.delete(cli.north_url(&format!("/workflows/{}", name)))).await?;
            println!("Deleted workflow {}", name);
            Value::Null
        }
    };

    print(&response)
}

async fn handle_job(client: &Client, cli: &Cli, command: &JobCommands) -> anyhow::Result<()> {
    let response = match command {
        JobCommands::Create {
            workflow,
            client_id,
            tags,
            definition,
            state,
        } => {
            let definition: Option<Value> =
                definition.as_deref().map(serde_json::from_str).transpose()?;
            let body = json!({
                "clientId": client_id,
                "workflow": workflow,
                "tags": tags,
                "definition": definition,
                "state": state,
            });
            send(client.post(cli.north_url("/jobs")).json(&body)).await?
        }
        JobCommands::Get { id, history } => {
            let request = client
                .get(cli.north_url(&format!("/jobs/{}", id)))
                .query(&[("history", history.to_string())]);
            send(request).await?
        }
        JobCommands::Query {
            client_id,
            state,
            workflow,
            tag,
            group,
            page,
        } => {
            let mut query = page.query();
            if let Some(v) = client_id {
                query.push(("clientId", v.clone()));
            }
            if let Some(v) = state {
                query.push(("state", v.clone()));
            }
            if let Some(v) = workflow {
                query.push(("workflow", v.clone()));
            }
            query.extend(tag.iter().map(|t| ("tag", t.clone())));
            query.extend(group.iter().map(|g| ("group", g.clone())));
            send(client.get(cli.north_url("/jobs")).query(&query)).await?
        }
        JobCommands::Delete { id } => {
            send(client.delete(cli.north_url(&format!("/jobs/{}", id)))).await?;
            println!("Deleted job {}", id);
            Value::Null
        }
        JobCommands::GetStatus { id } => {
            send(client.get(cli.north_url(&format!("/jobs/{}/status", id)))).await?
        }
        JobCommands::UpdateStatus {
            id,
            state,
            progress,
            message,
            actor,
        } => {
            let mut body = json!({ "state": state });
            if let Some(progress) = progress {
                body["progress"] = json!(progress);
            }
            if let Some(message) = message {
                body["message"] = json!(message);
            }
            let url = cli.url(*actor, &format!("/jobs/{}/status", id));
            send(client.put(url).json(&body)).await?
        }
        JobCommands::AddTags { id, tags } => {
            send(client.post(cli.north_url(&format!("/jobs/{}/tags", id))).json(tags)).await?
        }
        JobCommands::DelTags { id, tags } => {
            send(client.delete(cli.north_url(&format!("/jobs/{}/tags", id))).json(tags)).await?
        }
        JobCommands::Events {
            job_ids,
            client_ids,
            workflows,
            tags,
            actions,
            max_retries,
            actor,
        } => {
            let query: Vec<(&str, String)> = [
                ("jobIds", job_ids),
                ("clientIds", client_ids),
                ("workflows", workflows),
                ("tags", tags),
                ("actions", actions),
            ]
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(key, values)| (key, values.join(",")))
            .collect();
            let url = Url::parse_with_params(&cli.url(*actor, "/jobs/events"), &query)?;

            let backoff = Backoff {
                max_retries: *max_retries,
                ..Backoff::default()
            };
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                }
            });

            stream::follow(client, url.as_str(), &backoff, &cancel, |message| {
                println!("{}", message.data);
            })
            .await?;
            Value::Null
        }
    };

    print(&response)
}
