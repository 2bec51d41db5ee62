//! Operator CLI for the convoy command API.
//!
//! Each subcommand maps onto one REST call and prints the JSON response.

use anyhow::Result;
use clap::{Parser, Subcommand};
use convoy_cli::{parse_enum, CommandClient};
use convoy_core::{ConvoyStatus, EventSeverity, EventType, Priority, SegmentStatus};
use serde_json::{json, Map, Value};

/// Drive the convoy command server from the terminal
#[derive(Parser, Debug)]
#[command(name = "convoy", author, version, about)]
struct Cli {
    /// Convoy server URL
    #[arg(long, env = "CONVOY_URL", default_value = "http://localhost:5000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check server health
    Health,

    /// List convoys, ordered by priority
    List {
        #[arg(long, value_parser = parse_enum::<Priority>)]
        priority: Option<Priority>,
        #[arg(long, value_parser = parse_enum::<ConvoyStatus>)]
        status: Option<ConvoyStatus>,
    },

    /// Show one convoy
    Show { id: String },

    /// Register a convoy
    Create {
        /// Origin as "lat,lng"
        #[arg(long, value_parser = parse_point)]
        from: (f64, f64),
        /// Destination as "lat,lng"
        #[arg(long, value_parser = parse_point)]
        to: (f64, f64),
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_parser = parse_enum::<Priority>)]
        priority: Option<Priority>,
        #[arg(long)]
        speed: Option<f64>,
        #[arg(long)]
        vehicles: Option<i64>,
    },

    /// Set a convoy's status
    Status {
        id: String,
        #[arg(value_parser = parse_enum::<ConvoyStatus>)]
        status: ConvoyStatus,
    },

    /// Plan (and by default commit) a route
    Optimize {
        id: String,
        /// Reroute to "lat,lng" instead of the stored destination
        #[arg(long, value_parser = parse_point)]
        to: Option<(f64, f64)>,
        /// Plan only; leave the assigned route untouched
        #[arg(long)]
        dry_run: bool,
    },

    /// Submit a field event
    Event {
        #[arg(value_parser = parse_enum::<EventType>)]
        kind: EventType,
        #[arg(long, value_parser = parse_enum::<EventSeverity>, default_value = "MEDIUM")]
        severity: EventSeverity,
        #[arg(long)]
        segment: Option<String>,
        #[arg(long)]
        convoy: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Clear a checkpoint
    Checkpoint {
        convoy: String,
        checkpoint: String,
        /// Reported position as "lat,lng"
        #[arg(long, value_parser = parse_point)]
        at: (f64, f64),
    },

    /// List conflicts
    Conflicts {
        #[arg(long)]
        convoy: Option<String>,
        /// Hide acknowledged conflicts
        #[arg(long)]
        open: bool,
    },

    /// Acknowledge a conflict
    Ack { id: String },

    /// List merge suggestions
    Merges,

    /// List road segments
    Segments,

    /// Segments sharing a junction with the given one
    Neighbors { id: String },

    /// Override a segment's status
    Block {
        id: String,
        #[arg(long, value_parser = parse_enum::<SegmentStatus>, default_value = "BLOCKED")]
        status: SegmentStatus,
        #[arg(long)]
        risk: Option<f64>,
    },
}

fn parse_point(raw: &str) -> Result<(f64, f64), String> {
    let (lat, lng) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected lat,lng, got '{raw}'"))?;
    let lat: f64 = lat.trim().parse().map_err(|_| format!("bad latitude '{lat}'"))?;
    let lng: f64 = lng.trim().parse().map_err(|_| format!("bad longitude '{lng}'"))?;
    Ok((lat, lng))
}

fn point((lat, lng): (f64, f64)) -> Value {
    json!({ "lat": lat, "lng": lng })
}

/// Insert only the fields that were given.
fn insert_some<T: serde::Serialize>(body: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        body.insert(key.to_string(), json!(value));
    }
}

fn query(pairs: &[(&str, Option<String>)]) -> String {
    let parts: Vec<String> = pairs
        .iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}={v}")))
        .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!("?{}", parts.join("&"))
    }
}

fn wire<T: serde::Serialize>(value: T) -> Option<String> {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
}

fn run(client: &CommandClient, command: Commands) -> Result<Value> {
    match command {
        Commands::Health => client.get("/health"),
        Commands::List { priority, status } => client.get(&format!(
            "/convoys{}",
            query(&[
                ("priority", priority.and_then(wire)),
                ("status", status.and_then(wire)),
            ])
        )),
        Commands::Show { id } => client.get(&format!("/convoys/{id}")),
        Commands::Create {
            from,
            to,
            name,
            priority,
            speed,
            vehicles,
        } => {
            let mut body = Map::new();
            body.insert("origin".into(), point(from));
            body.insert("destination".into(), point(to));
            insert_some(&mut body, "name", name);
            insert_some(&mut body, "priority", priority);
            insert_some(&mut body, "speedKmph", speed);
            insert_some(&mut body, "vehicleCount", vehicles);
            client.post("/convoys", &body)
        }
        Commands::Status { id, status } => {
            client.put(&format!("/convoys/{id}/status"), &json!({ "status": status }))
        }
        Commands::Optimize { id, to, dry_run } => {
            let mut body = Map::new();
            body.insert("convoyId".into(), json!(id));
            body.insert("commit".into(), json!(!dry_run));
            insert_some(&mut body, "destinationOverride", to.map(point));
            client.post("/optimizer/route", &body)
        }
        Commands::Event {
            kind,
            severity,
            segment,
            convoy,
            notes,
        } => {
            let mut body = Map::new();
            body.insert("type".into(), json!(kind));
            body.insert("severity".into(), json!(severity));
            insert_some(&mut body, "affectedSegmentId", segment);
            insert_some(&mut body, "convoyId", convoy);
            insert_some(&mut body, "notes", notes);
            client.post("/events", &body)
        }
        Commands::Checkpoint {
            convoy,
            checkpoint,
            at,
        } => client.post(
            "/checkpoints",
            &json!({ "convoyId": convoy, "checkpointId": checkpoint, "location": point(at) }),
        ),
        Commands::Conflicts { convoy, open } => client.get(&format!(
            "/conflicts{}",
            query(&[
                ("convoyId", convoy),
                ("unacknowledged", open.then(|| "true".to_string())),
            ])
        )),
        Commands::Ack { id } => client.post(&format!("/conflicts/{id}/acknowledge"), &json!({})),
        Commands::Merges => client.get("/merges"),
        Commands::Segments => client.get("/segments"),
        Commands::Neighbors { id } => client.get(&format!("/segments/{id}/neighbors")),
        Commands::Block { id, status, risk } => {
            let mut body = Map::new();
            body.insert("status".into(), json!(status));
            insert_some(&mut body, "riskLevel", risk);
            client.put(&format!("/segments/{id}/status"), &body)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = CommandClient::new(&cli.url);

    match run(&client, cli.command) {
        Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ {} ({})", e, client.base_url());
            std::process::exit(1);
        }
    }
}
