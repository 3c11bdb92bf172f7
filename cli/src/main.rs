use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Map, Value, json};

const EMPLOYEE_HEADER: &str = "x-employee-name";
const MIN_POLL_SECS: u64 = 3;
const MAX_POLL_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("server returned {status}: {message}")]
    ServerError { status: u16, message: String },
    #[error("timed out after {0}s with messages still pending")]
    PendingTimeout(u64),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "lexcrm-cli", about = "Lead timeline, WhatsApp, mailbox and summary CLI")]
struct Cli {
    #[arg(long, env = "LEXCRM_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    /// Sent as `X-Employee-Name` on every request.
    #[arg(long, env = "LEXCRM_EMPLOYEE")]
    employee: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone)]
struct CliContext {
    base_url: String,
    employee: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    /// Print one page of a lead's timeline.
    Timeline(TimelineArgs),
    Note(NoteCommand),
    Whatsapp(WhatsappCommand),
    Email(EmailCommand),
    /// AI case summary for a lead.
    Summary { lead: String },
}

#[derive(Args, Debug)]
struct TimelineArgs {
    lead: String,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(long)]
    limit: Option<usize>,
    /// Bypass the server-side timeline cache.
    #[arg(long, default_value_t = false)]
    refresh: bool,
}

#[derive(Args, Debug)]
struct NoteCommand {
    #[command(subcommand)]
    command: NoteSubcommand,
}

#[derive(Subcommand, Debug)]
enum NoteSubcommand {
    Add {
        lead: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        direction: Option<String>,
        #[arg(long)]
        length: Option<String>,
        #[arg(long)]
        observation: Option<String>,
    },
}

#[derive(Args, Debug)]
struct WhatsappCommand {
    #[command(subcommand)]
    command: WhatsappSubcommand,
}

#[derive(Subcommand, Debug)]
enum WhatsappSubcommand {
    Send(WhatsappSendArgs),
    List { lead: String },
}

#[derive(Args, Debug)]
struct WhatsappSendArgs {
    lead: String,
    #[arg(long)]
    message: String,
    #[arg(long)]
    phone: Option<String>,
    /// Poll the thread until no message is pending.
    #[arg(long, default_value_t = false)]
    wait: bool,
    #[arg(long, default_value_t = MIN_POLL_SECS)]
    poll_secs: u64,
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[derive(Args, Debug)]
struct EmailCommand {
    #[command(subcommand)]
    command: EmailSubcommand,
}

#[derive(Subcommand, Debug)]
enum EmailSubcommand {
    Send {
        lead: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
        /// Repeatable; defaults to the lead's stored email.
        #[arg(long)]
        to: Vec<String>,
        #[arg(long)]
        cc: Vec<String>,
        #[arg(long, default_value_t = false)]
        html: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = CliContext { base_url: cli.base_url, employee: cli.employee };

    match cli.command {
        Command::Ping => run_ping(&ctx).await,
        Command::Timeline(args) => run_timeline(&ctx, args).await,
        Command::Note(note) => run_note(&ctx, note).await,
        Command::Whatsapp(wa) => run_whatsapp(&ctx, wa).await,
        Command::Email(email) => run_email(&ctx, email).await,
        Command::Summary { lead } => {
            let path = format!("/api/leads/{lead}/summary");
            let json = api_request(&ctx, reqwest::Method::POST, &path, None).await?;
            if let Some(summary) = json.get("summary").and_then(Value::as_str) {
                println!("{summary}");
                eprintln!(
                    "model: {}, interactions: {}",
                    json.get("model").and_then(Value::as_str).unwrap_or("?"),
                    json.get("interactions_used").and_then(Value::as_u64).unwrap_or(0)
                );
                Ok(())
            } else {
                print_json(&json)
            }
        }
    }
}

async fn run_ping(cli: &CliContext) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}/healthz", cli.base_url.trim_end_matches('/'));
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerError { status: status.as_u16(), message: "health check failed".to_owned() });
    }
    println!("ok");
    Ok(())
}

fn timeline_path(args: &TimelineArgs) -> String {
    let mut path = format!("/api/leads/{}/interactions?offset={}", args.lead, args.offset);
    if let Some(limit) = args.limit {
        path.push_str(&format!("&limit={limit}"));
    }
    if args.refresh {
        path.push_str("&refresh=true");
    }
    path
}

async fn run_timeline(cli: &CliContext, args: TimelineArgs) -> Result<(), CliError> {
    let json = api_request(cli, reqwest::Method::GET, &timeline_path(&args), None).await?;
    print_json(&json)
}

async fn run_note(cli: &CliContext, note: NoteCommand) -> Result<(), CliError> {
    match note.command {
        NoteSubcommand::Add { lead, content, kind, direction, length, observation } => {
            let mut body = Map::new();
            body.insert("content".to_owned(), Value::String(content));
            for (key, value) in [("kind", kind), ("direction", direction), ("length", length), ("observation", observation)] {
                if let Some(value) = value {
                    body.insert(key.to_owned(), Value::String(value));
                }
            }
            let path = format!("/api/leads/{lead}/interactions");
            let json = api_request(cli, reqwest::Method::POST, &path, Some(Value::Object(body))).await?;
            print_json(&json)
        }
    }
}

async fn run_whatsapp(cli: &CliContext, wa: WhatsappCommand) -> Result<(), CliError> {
    match wa.command {
        WhatsappSubcommand::List { lead } => {
            let json = api_request(cli, reqwest::Method::GET, &format!("/api/leads/{lead}/whatsapp"), None).await?;
            print_json(&json)
        }
        WhatsappSubcommand::Send(args) => {
            let mut body = json!({ "lead_id": args.lead, "message": args.message });
            if let Some(phone) = &args.phone {
                body["phone"] = Value::String(phone.clone());
            }
            let sent = api_request(cli, reqwest::Method::POST, "/api/whatsapp/send-message", Some(body)).await?;
            print_json(&sent)?;
            if args.wait {
                wait_for_delivery(cli, &args).await?;
            }
            Ok(())
        }
    }
}

fn clamp_poll_secs(requested: u64) -> u64 {
    requested.clamp(MIN_POLL_SECS, MAX_POLL_SECS)
}

fn has_pending(thread: &Value) -> bool {
    thread.get("has_pending").and_then(Value::as_bool).unwrap_or(false)
}

/// Re-fetch the thread until nothing is pending or the timeout passes.
async fn wait_for_delivery(cli: &CliContext, args: &WhatsappSendArgs) -> Result<(), CliError> {
    let interval = Duration::from_secs(clamp_poll_secs(args.poll_secs));
    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    let path = format!("/api/leads/{}/whatsapp", args.lead);

    loop {
        tokio::time::sleep(interval).await;
        let thread = api_request(cli, reqwest::Method::GET, &path, None).await?;
        if !has_pending(&thread) {
            let last = thread
                .get("messages")
                .and_then(Value::as_array)
                .and_then(|m| m.last())
                .and_then(|m| m.get("status"))
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            eprintln!("delivery settled: {last}");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(CliError::PendingTimeout(args.timeout_secs));
        }
        eprintln!("still pending; polling again in {}s", interval.as_secs());
    }
}

async fn run_email(cli: &CliContext, email: EmailCommand) -> Result<(), CliError> {
    match email.command {
        EmailSubcommand::Send { lead, subject, body, to, cc, html } => {
            let payload = json!({
                "lead_id": lead,
                "subject": subject,
                "body": body,
                "to": to,
                "cc": cc,
                "html": html,
            });
            let json = api_request(cli, reqwest::Method::POST, "/api/mailbox/send", Some(payload)).await?;
            print_json(&json)
        }
    }
}

async fn api_request(
    cli: &CliContext,
    method: reqwest::Method,
    path: &str,
    body: Option<Value>,
) -> Result<Value, CliError> {
    let mut headers = HeaderMap::new();
    if let Some(employee) = cli.employee.as_deref() {
        headers.insert(EMPLOYEE_HEADER, HeaderValue::from_str(employee)?);
    }

    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let url = format!("{}{}", cli.base_url.trim_end_matches('/'), path);

    let request = client.request(method, &url);
    let request = if let Some(json) = body { request.json(&json) } else { request };

    let response = request.send().await?;
    let status = response.status();
    let value = response.json::<Value>().await.unwrap_or(Value::Null);

    if !status.is_success() {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| value.to_string(), str::to_owned);
        return Err(CliError::ServerError { status: status.as_u16(), message });
    }

    Ok(value)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
