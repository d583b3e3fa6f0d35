use anyhow::{bail, Context, Result};
use bulk_blaster::config::{AppConfig, DispatchConfig};
use bulk_blaster::contacts::{Contact, ContactNormalizer, ParseSummary};
use bulk_blaster::dispatch::{
    BackoffPolicy, DispatchJob, DispatchReport, DispatchTarget, Dispatcher, LogSink, SendAction,
};
use bulk_blaster::email_sender::{
    gmail, validate_batch, EmailRecipient, GmailSender, SmtpSender,
};
use bulk_blaster::template::MessageTemplate;
use bulk_blaster::whatsapp::{GatewaySession, SessionState, WhatsAppSender};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "bulk-blaster", version, about = "Personalized bulk email and WhatsApp sender")]
struct Cli {
    /// Config file to use instead of ./bulk-blaster.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract contacts from a .txt, .csv, .xlsx or .xls file
    Contacts { file: PathBuf },
    /// Parse pasted "name: number" entries
    ParseNumbers { text: String },
    /// Clean and validate a single phone number
    ValidateNumber { number: String },
    /// Send an email batch over SMTP
    Smtp {
        #[command(flatten)]
        email: EmailArgs,
        /// Save the configured password to the OS keyring before sending
        #[arg(long)]
        store_password: bool,
    },
    /// Send an email batch through the Gmail API
    Gmail {
        #[command(flatten)]
        email: EmailArgs,
    },
    /// Send a WhatsApp batch through the local bridge
    Whatsapp {
        /// Message template; `{{name}}` is replaced per contact
        #[arg(long)]
        template: PathBuf,
        /// Contact file to import
        #[arg(long, conflicts_with = "numbers", required_unless_present = "numbers")]
        contacts: Option<PathBuf>,
        /// Pasted numbers instead of a file
        #[arg(long)]
        numbers: Option<String>,
        #[arg(long)]
        delay_ms: Option<u64>,
    },
}

#[derive(Args)]
struct EmailArgs {
    /// Template file: "Subject: ..." line, "---", then the HTML body
    #[arg(long)]
    template: PathBuf,
    /// File with one recipient address per line
    #[arg(long)]
    recipients: PathBuf,
    #[arg(long)]
    delay_ms: Option<u64>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancels the token on the first Ctrl-C so the batch stops after the
/// in-flight item.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; skipping the remaining targets");
            child.cancel();
        }
    });
    token
}

fn dispatch_settings(config: &DispatchConfig, delay_override: Option<u64>) -> DispatchConfig {
    let mut settings = config.clone();
    if let Some(ms) = delay_override {
        settings.delay_ms = ms;
    }
    settings
}

async fn run_batch<T, A>(
    action: A,
    targets: Vec<T>,
    template: MessageTemplate,
    settings: &DispatchConfig,
    backoff: BackoffPolicy,
) -> Result<()>
where
    T: DispatchTarget + Serialize,
    A: SendAction<T>,
{
    let dispatcher = Dispatcher::new(action, LogSink)
        .with_backoff(backoff)
        .with_name_fallback(settings.name_fallback.clone())
        .with_cancellation(cancel_on_ctrl_c());

    let job = DispatchJob {
        targets,
        template,
        delay: settings.delay(),
    };
    let report: DispatchReport<T> = dispatcher.run(job).await?;
    info!(
        "Batch finished: {} sent, {} failed, {} skipped",
        report.summary.sent, report.summary.failed, report.summary.skipped
    );
    print_json(&report)
}

fn load_email_batch(args: &EmailArgs) -> Result<(MessageTemplate, Vec<EmailRecipient>)> {
    let template = MessageTemplate::load(&args.template)?;
    let recipients_text = std::fs::read_to_string(&args.recipients)
        .with_context(|| format!("Failed to read recipients from {}", args.recipients.display()))?;
    let recipients = validate_batch(&recipients_text, &template)?;
    Ok((template, recipients))
}

fn load_contacts(
    normalizer: &ContactNormalizer,
    file: Option<&Path>,
    numbers: Option<&str>,
) -> Result<Vec<Contact>> {
    let summary: ParseSummary = match (file, numbers) {
        (Some(path), _) => normalizer.extract_file(path)?,
        (None, Some(text)) => normalizer.parse_manual_numbers(text),
        (None, None) => bail!("Either --contacts or --numbers is required"),
    };
    info!("{}", summary.message);
    Ok(summary.contacts)
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- Load .env file at the very beginning ---
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded .env file from: {:?}", path);
    }

    env_logger::init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Contacts { file } => {
            let normalizer = ContactNormalizer::new(&config.contacts)?;
            print_json(&normalizer.extract_file(&file)?)
        }
        Command::ParseNumbers { text } => {
            let normalizer = ContactNormalizer::new(&config.contacts)?;
            print_json(&normalizer.parse_manual_numbers(&text))
        }
        Command::ValidateNumber { number } => {
            let normalizer = ContactNormalizer::new(&config.contacts)?;
            print_json(&normalizer.validate(&number))
        }
        Command::Smtp {
            email,
            store_password,
        } => {
            let smtp_config = config
                .smtp
                .as_ref()
                .context("Missing [smtp] section in configuration")?;
            if store_password {
                smtp_config.store_password()?;
                info!("Stored SMTP password in the OS keyring");
            }
            let (template, recipients) = load_email_batch(&email)?;

            let sender = SmtpSender::new(smtp_config)?;
            sender.verify().await?;

            let settings = dispatch_settings(&config.dispatch, email.delay_ms);
            run_batch(sender, recipients, template, &settings, BackoffPolicy::default()).await
        }
        Command::Gmail { email } => {
            let gmail_config = config
                .gmail
                .as_ref()
                .context("Missing [gmail] section in configuration")?;
            let (template, recipients) = load_email_batch(&email)?;

            let tokens = gmail::authenticator(gmail_config).await?;
            let sender = GmailSender::connect(
                tokens,
                &gmail_config.from_email,
                gmail_config.sender_name.as_deref(),
            )
            .await?;

            let settings = dispatch_settings(&config.dispatch, email.delay_ms);
            run_batch(sender, recipients, template, &settings, BackoffPolicy::default()).await
        }
        Command::Whatsapp {
            template,
            contacts,
            numbers,
            delay_ms,
        } => {
            let template = MessageTemplate::load(&template)?;
            if template.body_is_blank() {
                bail!("Please enter a message");
            }
            let normalizer = ContactNormalizer::new(&config.contacts)?;
            let targets = load_contacts(&normalizer, contacts.as_deref(), numbers.as_deref())?;

            let mut session = GatewaySession::new(
                &config.whatsapp.gateway_url,
                config.whatsapp.api_key.clone(),
            );
            if session.connect().await? != SessionState::Ready {
                bail!("WhatsApp bridge is not logged in; scan the QR code in the bridge first");
            }
            let sender = WhatsAppSender::new(session)?;

            let settings = dispatch_settings(&config.dispatch, delay_ms);
            run_batch(sender, targets, template, &settings, config.whatsapp.backoff()).await
        }
    }
}
