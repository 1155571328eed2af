use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Base URL of the rollcalld HTTP server
    #[arg(long, env = "ROLLCALL_URL", default_value = "http://127.0.0.1:5000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show today's attendance roster
    Roster,
    /// Email the roster to the configured recipients
    Send,
    /// Write the roster to a dated CSV file on the daemon host
    Export,
    /// Clear the roster
    Reset,
    /// Show daemon status
    Status,
    /// Run detection on an image file and record what it finds
    Detect {
        /// Path to a JPEG or PNG image
        path: PathBuf,
    },
    /// List local V4L2 cameras
    Devices,
}

struct Client {
    agent: ureq::Agent,
    base: String,
}

impl Client {
    fn new(base: &str) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .agent
            .get(self.url(path).as_str())
            .call()
            .with_context(|| format!("is rollcalld running at {}?", self.base))?;
        read_json(response)
    }

    fn post(&self, path: &str, content_type: &str, body: &[u8]) -> Result<Value> {
        let response = self
            .agent
            .post(self.url(path).as_str())
            .header("Content-Type", content_type)
            .send(body)
            .with_context(|| format!("is rollcalld running at {}?", self.base))?;
        read_json(response)
    }

    /// POST an action endpoint and print its message.
    fn action(&self, path: &str) -> Result<()> {
        let body = self.post(path, "application/json", b"{}")?;
        println!("{}", message(&body));
        Ok(())
    }
}

fn read_json(mut response: ureq::http::Response<ureq::Body>) -> Result<Value> {
    let status = response.status();
    let text = response.body_mut().read_to_string()?;
    let body: Value = serde_json::from_str(&text)
        .with_context(|| format!("unexpected response ({status}): {text}"))?;
    if !status.is_success() {
        bail!("{} ({})", message(&body), status.as_u16());
    }
    Ok(body)
}

fn message(body: &Value) -> &str {
    body.get("message").and_then(Value::as_str).unwrap_or("")
}

/// Render the roster JSON object as an aligned table, in sighting order.
fn format_roster(roster: &Value) -> String {
    let Some(entries) = roster.as_object().filter(|m| !m.is_empty()) else {
        return "No attendees yet.".to_string();
    };

    let width = entries.keys().map(|k| k.len()).max().unwrap_or(0).max(4);
    let mut out = format!("{:<width$}  {:<8}  {:<10}  LATE\n", "NAME", "TIME", "DATE");
    for (label, record) in entries {
        let field = |key: &str| record.get(key).and_then(Value::as_str).unwrap_or("-").to_string();
        let late = record.get("late").and_then(Value::as_bool).unwrap_or(false);
        out.push_str(&format!(
            "{:<width$}  {:<8}  {:<10}  {}\n",
            label,
            field("time"),
            field("date"),
            if late { "yes" } else { "no" }
        ));
    }
    out
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.url);

    match cli.command {
        Commands::Roster => {
            let roster = client.get("/get_attendance")?;
            print!("{}", format_roster(&roster));
        }
        Commands::Send => client.action("/send_attendance")?,
        Commands::Export => {
            let body = client.post("/export_attendance", "application/json", b"{}")?;
            println!("{}", message(&body));
            if let Some(path) = body.get("path").and_then(Value::as_str) {
                println!("  {path}");
            }
        }
        Commands::Reset => client.action("/reset_attendance")?,
        Commands::Status => {
            let status = client.get("/status")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Detect { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            tracing::debug!(path = %path.display(), bytes = bytes.len(), "uploading still");
            let body = client.post("/detect", "application/octet-stream", &bytes)?;

            let detections = body["detections"].as_array().map(Vec::as_slice).unwrap_or(&[]);
            if detections.is_empty() {
                println!("Nothing detected.");
            }
            for d in detections {
                println!(
                    "{:<20} {:.2}",
                    d["label"].as_str().unwrap_or("?"),
                    d["confidence"].as_f64().unwrap_or(0.0)
                );
            }
            if let Some(recorded) = body["recorded"].as_array().filter(|r| !r.is_empty()) {
                let names: Vec<&str> = recorded.iter().filter_map(Value::as_str).collect();
                println!("Recorded: {}", names.join(", "));
            }
        }
        Commands::Devices => {
            let devices = rollcall_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found.");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_empty_roster() {
        assert_eq!(format_roster(&json!({})), "No attendees yet.");
    }

    #[test]
    fn test_format_roster_keeps_order() {
        let roster: Value = serde_json::from_str(
            r#"{"zoe": {"time": "08:01:00", "date": "18-10-2026", "late": false},
                "al": {"time": "09:30:00", "date": "18-10-2026", "late": true}}"#,
        )
        .unwrap();
        let text = format_roster(&roster);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("NAME"));
        assert!(lines[1].starts_with("zoe "));
        assert!(lines[1].ends_with("no"));
        assert!(lines[2].starts_with("al "));
        assert!(lines[2].ends_with("yes"));
    }

    #[test]
    fn test_message_field() {
        assert_eq!(message(&json!({"message": "ok"})), "ok");
        assert_eq!(message(&json!({})), "");
    }

    #[test]
    fn test_cli_parses_detect() {
        let cli = Cli::try_parse_from(["rollcall", "--url", "http://host:1/", "detect", "a.jpg"]).unwrap();
        assert_eq!(cli.url, "http://host:1/");
        assert!(matches!(cli.command, Commands::Detect { ref path } if path == &PathBuf::from("a.jpg")));
        assert_eq!(Client::new(&cli.url).url("/status"), "http://host:1/status");
    }
}
