// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! medscan: personal health-records client
//!
//! Every subcommand is one user action against the global state container.

use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use medscan::api::HttpBackend;
use medscan::config::AppConfig;
use medscan::extraction::{self, VisionClient};
use medscan::model::{Gender, MedicalInfoPatch, Theme};
use medscan::profiles::ProfileBook;
use medscan::state::{GlobalState, MedicalSync};
use medscan::store::KvStore;
use medscan::upload::{self, UploadCategory, UploadFile};
use medscan::{MedscanError, Result};

/// medscan CLI - personal health-records client
#[derive(Parser, Debug)]
#[command(name = "medscan")]
#[command(version)]
#[command(about = "Upload prescriptions and lab reports for AI summaries", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Session(SessionCommands),

    /// Family profiles kept on this device
    Profiles {
        #[command(subcommand)]
        action: ProfileCommands,
    },

    /// Extract structured data from an image with the vision model
    Extract {
        #[command(subcommand)]
        action: ExtractCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

/// Actions that run against the global state container
#[derive(Subcommand, Debug)]
enum SessionCommands {
    /// Create an account and log in
    Register {
        #[arg(short, long)]
        email: String,

        /// Full name shown on the account
        #[arg(short, long)]
        name: String,

        /// Password (read from stdin when omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Log in and cache the session
    Login {
        #[arg(short, long)]
        email: String,

        /// Password (read from stdin when omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// End the session (always clears local state)
    Logout,

    /// Show the signed-in account
    Whoami,

    /// Upload a photo or PDF for analysis
    Upload {
        /// Image or PDF file
        path: PathBuf,

        /// What the file shows
        #[arg(short = 't', long, default_value = "report", value_parser = ["medicine", "report"])]
        category: String,
    },

    /// Scan history
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },

    /// Medical background (conditions, allergies, medications)
    Medical {
        #[command(subcommand)]
        action: MedicalCommands,
    },

    /// Account details
    Account {
        #[command(subcommand)]
        action: AccountCommands,
    },

    /// App preferences
    Settings {
        #[command(subcommand)]
        action: SettingsCommands,
    },

    /// Locally stored data
    Data {
        #[command(subcommand)]
        action: DataCommands,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List cached history entries
    List {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,
    },

    /// Fetch history from the backend
    Refresh,

    /// Show the full analysis of one entry
    Show {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum MedicalCommands {
    Show,

    /// Change one or more fields; others keep their value
    Set {
        #[arg(long)]
        conditions: Option<String>,

        #[arg(long)]
        allergies: Option<String>,

        #[arg(long)]
        medications: Option<String>,
    },

    /// Fetch the backend copy
    Pull,
}

#[derive(Subcommand, Debug)]
enum AccountCommands {
    /// Change the display name
    Rename {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsCommands {
    Show,

    Theme {
        #[arg(value_parser = ["light", "dark", "system"])]
        theme: String,
    },

    /// High-contrast mode
    Contrast {
        #[arg(value_parser = ["on", "off"])]
        mode: String,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileCommands {
    List,

    Add {
        name: String,

        #[arg(short, long)]
        age: u32,

        #[arg(short, long, value_parser = ["male", "female", "other"])]
        gender: String,
    },

    Delete {
        id: String,
    },

    /// Make a profile the current one
    Switch {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ExtractCommands {
    /// Doctor, diagnosis and medicines from a prescription photo
    Prescription {
        image: PathBuf,

        /// Return the built-in sample instead of calling the model
        #[arg(long)]
        mock: bool,
    },

    /// Test values from a lab report photo
    Lab {
        image: PathBuf,

        /// Return the built-in sample instead of calling the model
        #[arg(long)]
        mock: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DataCommands {
    /// List stored keys
    List,

    /// Remove everything stored on this device
    Clear {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load_with_env(&cli.config)?;
    let json = cli.format == "json";

    match cli.command {
        Commands::Config { action } => run_config_command(config, action, &cli.config),
        Commands::Extract { action } => run_extract(config, action, json).await,
        Commands::Profiles { action } => {
            let store = KvStore::open(&config.storage.path)?;
            run_profiles_command(store, action, json)
        }
        Commands::Session(command) => {
            let store = KvStore::open(&config.storage.path)?;
            let backend = HttpBackend::new(&config.api)?;
            debug!("Backend: {}", backend.base_url());
            let mut state = GlobalState::load(backend, store.clone());
            run_state_command(&mut state, &store, command, json).await
        }
    }
}

/// Password from the flag, else one line of stdin
fn password_or_stdin(password: Option<String>) -> Result<String> {
    if let Some(p) = password {
        return Ok(p);
    }
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let line = line.trim_end_matches(['\r', '\n']).to_string();
    if line.is_empty() {
        return Err(MedscanError::Validation("Password must not be empty".to_string()));
    }
    Ok(line)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_state_command(
    state: &mut GlobalState<HttpBackend>,
    store: &KvStore,
    command: SessionCommands,
    json: bool,
) -> Result<()> {
    match command {
        SessionCommands::Register { email, name, password } => {
            let password = password_or_stdin(password)?;
            state.register(&email, &password, &name).await?;
            println!("Welcome, {}. You are logged in.", name);
        }
        SessionCommands::Login { email, password } => {
            let password = password_or_stdin(password)?;
            state.login(&email, &password).await?;
            let snap = state.snapshot();
            println!(
                "Logged in as {} ({} history items)",
                email,
                snap.reports.len()
            );
        }
        SessionCommands::Logout => {
            state.logout().await;
            println!("Logged out");
        }
        SessionCommands::Whoami => {
            let snap = state.snapshot();
            if json {
                return print_json(&snap.session);
            }
            match snap.user() {
                Some(user) => println!("{} <{}>", user.name, user.email),
                None if snap.is_logged_in() => println!("Logged in (no user details cached)"),
                None => println!("Not logged in"),
            }
        }
        SessionCommands::Upload { path, category } => {
            let category: UploadCategory = category.parse()?;
            let outcome = state.upload_path(&path, category).await?;
            if json {
                return print_json(&outcome);
            }
            println!("Analysis complete ({})", outcome.kind);
            println!("{}", serde_json::to_string_pretty(&outcome.response)?);
        }
        SessionCommands::History { action } => run_history_command(state, action, json).await?,
        SessionCommands::Medical { action } => run_medical_command(state, action, json).await?,
        SessionCommands::Account { action } => match action {
            AccountCommands::Rename { name } => {
                if state.update_profile(&name)? {
                    println!("Name updated to {}", name);
                } else {
                    return Err(MedscanError::NotLoggedIn);
                }
            }
        },
        SessionCommands::Settings { action } => match action {
            SettingsCommands::Show => {
                let snap = state.snapshot();
                if json {
                    return print_json(&serde_json::json!({
                        "theme": snap.theme,
                        "high_contrast": snap.high_contrast,
                    }));
                }
                println!("Theme: {}", snap.theme);
                println!("High contrast: {}", if snap.high_contrast { "on" } else { "off" });
            }
            SettingsCommands::Theme { theme } => {
                let theme: Theme = theme.parse()?;
                state.set_theme(theme)?;
                println!("Theme set to {}", theme);
            }
            SettingsCommands::Contrast { mode } => {
                let enabled = mode == "on";
                state.set_high_contrast(enabled)?;
                println!("High contrast {}", mode);
            }
        },
        SessionCommands::Data { action } => match action {
            DataCommands::List => {
                let entries = store.entries()?;
                if json {
                    let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
                    return print_json(&keys);
                }
                println!("Stored keys ({}):", entries.len());
                for (key, value) in entries {
                    println!("  {:<16} {} bytes", key, value.len());
                }
            }
            DataCommands::Clear { force } => {
                if !force {
                    eprintln!("Use --force to confirm clearing all local data");
                    return Ok(());
                }
                state.clear_local_data()?;
                println!("Local data cleared");
            }
        },
    }

    Ok(())
}

async fn run_history_command(
    state: &mut GlobalState<HttpBackend>,
    action: HistoryCommands,
    json: bool,
) -> Result<()> {
    match action {
        HistoryCommands::List { count } => {
            let snap = state.snapshot();
            let items: Vec<_> = snap.reports.iter().take(count).collect();
            if json {
                return print_json(&items);
            }
            if items.is_empty() {
                println!("No history yet. Upload a prescription or report to get started.");
                return Ok(());
            }
            println!("History ({} of {}):", items.len(), snap.reports.len());
            for item in items {
                println!("  {}  {:<8} {:<20} {}", item.id, item.kind, item.date, item.headline());
            }
        }
        HistoryCommands::Refresh => {
            let count = state.refresh_history().await?;
            println!("Fetched {} history items", count);
        }
        HistoryCommands::Show { id } => {
            let snap = state.snapshot();
            let item = snap
                .reports
                .iter()
                .find(|i| i.id == id)
                .ok_or_else(|| MedscanError::Validation(format!("No history item with id {}", id)))?;
            if json {
                return print_json(item);
            }
            println!("{} ({}) on {}", item.id, item.kind, item.date);
            println!("Image: {}", item.image_ref);
            match &item.response {
                Some(response) => println!("{}", serde_json::to_string_pretty(response)?),
                None => println!("(no analysis)"),
            }
        }
    }
    Ok(())
}

async fn run_medical_command(
    state: &mut GlobalState<HttpBackend>,
    action: MedicalCommands,
    json: bool,
) -> Result<()> {
    match action {
        MedicalCommands::Show => {
            let info = state.snapshot().medical_info;
            if json {
                return print_json(&info);
            }
            println!("Conditions:  {}", or_dash(&info.conditions));
            println!("Allergies:   {}", or_dash(&info.allergies));
            println!("Medications: {}", or_dash(&info.medications));
        }
        MedicalCommands::Set { conditions, allergies, medications } => {
            let patch = MedicalInfoPatch { conditions, allergies, medications };
            if patch.is_empty() {
                return Err(MedscanError::Validation(
                    "Nothing to change; pass --conditions, --allergies or --medications".to_string(),
                ));
            }
            match state.update_medical_info(patch).await? {
                MedicalSync::Synced => println!("Medical info saved and synced"),
                MedicalSync::LocalOnly => println!("Medical info saved on this device"),
                MedicalSync::Failed(msg) => println!("Medical info saved on this device (sync failed: {})", msg),
            }
        }
        MedicalCommands::Pull => {
            state.sync_medical_info().await?;
            println!("Medical info updated from the backend");
        }
    }
    Ok(())
}

fn or_dash(s: &str) -> &str {
    if s.trim().is_empty() { "-" } else { s }
}

fn run_profiles_command(store: KvStore, action: ProfileCommands, json: bool) -> Result<()> {
    let mut book = ProfileBook::load(store)?;

    match action {
        ProfileCommands::List => {
            if json {
                return print_json(&book.profiles());
            }
            let current = book.current().map(|p| p.id.clone());
            println!("Family profiles:");
            for p in book.profiles() {
                let marker = if current.as_deref() == Some(p.id.as_str()) { "→" } else { " " };
                println!("  {} {}  {} ({} years, {})", marker, p.id, p.name, p.age, p.gender);
            }
        }
        ProfileCommands::Add { name, age, gender } => {
            let gender: Gender = gender.parse()?;
            let profile = book.add(&name, age, gender)?;
            println!("Added {} ({})", profile.name, profile.id);
        }
        ProfileCommands::Delete { id } => {
            book.delete(&id)?;
            println!("Deleted profile {}", id);
        }
        ProfileCommands::Switch { id } => {
            let profile = book.switch(&id)?;
            println!("Current profile: {}", profile.name);
        }
    }
    Ok(())
}

async fn run_extract(config: AppConfig, action: ExtractCommands, json: bool) -> Result<()> {
    let (image, mock, prescription) = match action {
        ExtractCommands::Prescription { image, mock } => (image, mock, true),
        ExtractCommands::Lab { image, mock } => (image, mock, false),
    };

    let encoded = encode_image(&image)?;
    let client = VisionClient::new(&config.ai)?;
    if !mock && !client.has_api_key() {
        info!("No API key configured; the model may reject the request");
    }

    if prescription {
        let rx = if mock {
            extraction::mock_prescription_extraction()
        } else {
            client.extract_prescription(&encoded).await?
        };
        if json {
            return print_json(&rx);
        }
        println!("Doctor:    {}", rx.doctor);
        println!("Date:      {}", rx.date);
        println!("Diagnosis: {}", rx.diagnosis);
        for m in &rx.medicines {
            println!("  - {} {}, {} for {} days", m.name, m.dosage, m.frequency, m.duration_days);
        }
        if let Some(follow_up) = &rx.follow_up_date {
            println!("Follow-up: {}", follow_up);
        }
    } else {
        let report = if mock {
            extraction::mock_lab_report_extraction()
        } else {
            client.extract_lab_report(&encoded).await?
        };
        if json {
            return print_json(&report);
        }
        println!("{} ({})", report.test_name, report.date);
        for v in &report.values {
            println!("  {:<20} {:>10} {:<24} {:?}", v.name, v.value, v.reference_range, v.status);
        }
        let flagged = report.flagged();
        if !flagged.is_empty() {
            println!("{} value(s) outside reference range", flagged.len());
        }
    }
    Ok(())
}

/// Prepared JPEG bytes of `path`, base64-encoded
fn encode_image(path: &Path) -> Result<String> {
    let file = UploadFile::from_path(path)?;
    if file.kind != upload::FileKind::Image {
        return Err(MedscanError::Validation("Extraction needs an image, not a PDF".to_string()));
    }
    Ok(upload::encode_base64(&file.bytes))
}

fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let mut shown = config.clone();
            if shown.ai.api_key.is_some() {
                shown.ai.api_key = Some("********".to_string());
            }
            print_json(&shown)?;
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Backend: {}", config.api.base_url);
            println!("  Vision model: {}", config.ai.model);
            println!("  Store: {}", config.storage.path);
        }
    }
    Ok(())
}
