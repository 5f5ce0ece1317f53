use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
mod auth;
use neurovault::{
    FixedDiagnosis, ImageClassifier, KdfParams, NeuroVault, PatientInfo, PlaceholderClassifier,
    ScanType, Session, Storage, VaultConfig, data_uri, report_file_name,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, clap::Args)]
struct Argon2Args {
    /// Argon2 memory cost in KiB (default: 65536)
    #[arg(long = "argon-mem")]
    mem_cost_kib: Option<u32>,

    /// Argon2 time cost / iterations (default: 3)
    #[arg(long = "argon-time")]
    time_cost: Option<u32>,

    /// Argon2 parallelism (default: 1)
    #[arg(long = "argon-parallelism")]
    parallelism: Option<u32>,
}

impl Argon2Args {
    fn to_kdf_params(&self) -> Result<KdfParams> {
        let default = KdfParams::default();

        Ok(KdfParams::new(
            self.mem_cost_kib.unwrap_or(default.mem_cost_kib()),
            self.time_cost.unwrap_or(default.time_cost()),
            self.parallelism.unwrap_or(default.parallelism()),
        )?)
    }
}

#[derive(Debug, clap::Args)]
struct PatientArgs {
    /// Patient name
    #[arg(long)]
    name: String,

    /// Patient age in years
    #[arg(long)]
    age: u8,

    /// Date of the scan
    #[arg(long, value_name = "YYYY-MM-DD")]
    scan_date: NaiveDate,

    /// MRI, CT, PET or SPECT
    #[arg(long)]
    scan_type: ScanType,

    /// Referring physician
    #[arg(long)]
    physician: String,
}

impl From<PatientArgs> for PatientInfo {
    fn from(args: PatientArgs) -> Self {
        PatientInfo {
            name: args.name,
            age: args.age,
            scan_date: args.scan_date,
            scan_type: args.scan_type,
            physician: args.physician,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "neurovault")]
#[command(
    version,
    about = "Encrypted brain scan analysis history and diagnostic reports."
)]
struct Cli {
    /// Directory holding the key, the user file and the histories
    #[arg(long, global = true, value_name = "PATH", env = "NEUROVAULT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Registers a new user
    #[command(arg_required_else_help = true)]
    Register {
        username: String,
        #[command(flatten)]
        argon2: Argon2Args,
    },

    /// Checks a user's password
    #[command(arg_required_else_help = true)]
    Login { username: String },

    /// Analyzes a scan image and stores the result in the user's history
    #[command(arg_required_else_help = true)]
    Analyze {
        username: String,
        #[command(flatten)]
        patient: PatientArgs,

        /// Scan image file
        #[arg(long, value_name = "PATH")]
        image: PathBuf,

        /// Use this diagnosis instead of the built-in classifier
        #[arg(long)]
        diagnosis: Option<String>,
    },

    /// Shows a user's history, most recent first
    #[command(arg_required_else_help = true)]
    History {
        username: String,

        /// Check every entry and report each one's status
        #[arg(long, default_value_t = false)]
        verify: bool,
    },

    /// Writes a PDF diagnostic report
    #[command(arg_required_else_help = true)]
    Report {
        username: String,
        #[command(flatten)]
        patient: PatientArgs,

        /// Diagnosis text
        #[arg(long)]
        diagnosis: String,

        /// Output file (default: <name>_report.pdf)
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,

        /// Print a base64 data URI instead of writing a file
        #[arg(long, default_value_t = false, conflicts_with = "out")]
        base64: bool,
    },

    /// Shows information about the vault
    Info {
        /// Also report whether this user is registered
        #[arg(long, value_name = "USERNAME")]
        user: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "neurovault=debug"
    } else {
        "neurovault=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn open_vault(data_dir: Option<PathBuf>, kdf: Option<KdfParams>) -> Result<NeuroVault> {
    let config = match data_dir {
        Some(dir) => VaultConfig::new(dir),
        None => VaultConfig::from_default_dir()?,
    };
    let config = match kdf {
        Some(kdf) => config.with_kdf(kdf),
        None => config,
    };
    NeuroVault::open(config).context("failed to open vault")
}

fn login(vault: &NeuroVault, username: &str) -> Result<Session> {
    let password = auth::read_password()?;
    Ok(vault.login(username, &password)?)
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();
    init_tracing(args.verbose);

    match args.command {
        Commands::Register { username, argon2 } => {
            let kdf = argon2.to_kdf_params()?;
            let vault = open_vault(args.data_dir, Some(kdf))?;
            let password = auth::read_new_password_with_confirmation()?;
            vault.register(&username, &password)?;
            println!("user '{username}' registered");
        }
        Commands::Login { username } => {
            let vault = open_vault(args.data_dir, None)?;
            login(&vault, &username)?;
            println!("login successful");
        }
        Commands::Analyze {
            username,
            patient,
            image,
            diagnosis,
        } => {
            let vault = open_vault(args.data_dir, None)?;
            let session = login(&vault, &username)?;
            let image = std::fs::read(&image)
                .with_context(|| format!("failed to read image {}", image.display()))?;

            let classifier: Box<dyn ImageClassifier> = match diagnosis {
                Some(d) => Box::new(FixedDiagnosis(d)),
                None => Box::new(PlaceholderClassifier),
            };
            let record =
                vault.record_analysis(&session, patient.into(), classifier.as_ref(), &image)?;
            println!("{}", record.diagnosis());
        }
        Commands::History { username, verify } => {
            let vault = open_vault(args.data_dir, None)?;
            let session = login(&vault, &username)?;

            if verify {
                let outcomes = vault.verify_history(&session)?;
                let failed = outcomes.iter().filter(|o| o.is_err()).count();
                for outcome in &outcomes {
                    match outcome {
                        Ok(record) => println!("ok      {}", record.timestamp()),
                        Err(e) => println!("FAILED  {e}"),
                    }
                }
                if failed > 0 {
                    bail!("{failed} of {} entries failed verification", outcomes.len());
                }
                return Ok(());
            }

            let records = vault.history_newest_first(&session)?;
            if records.is_empty() {
                println!("No history.");
                return Ok(());
            }
            for record in records {
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
        }
        Commands::Report {
            username,
            patient,
            diagnosis,
            out,
            base64,
        } => {
            let vault = open_vault(args.data_dir, None)?;
            login(&vault, &username)?;

            let info = PatientInfo::from(patient);
            let pdf = vault.report(&info, &diagnosis)?;

            if base64 {
                println!("{}", data_uri(&pdf));
            } else {
                let path = out.unwrap_or_else(|| PathBuf::from(report_file_name(&info.name)));
                Storage::new(path.clone()).save(&pdf)?;
                println!("report written to {}", path.display());
            }
        }
        Commands::Info { user } => {
            let vault = open_vault(args.data_dir, None)?;
            println!("data dir:        {}", vault.config().data_dir().display());
            println!("key fingerprint: {}", vault.key_fingerprint());
            println!("users:           {}", vault.user_count()?);
            if let Some(user) = user {
                let status = if vault.is_registered(&user)? {
                    "registered"
                } else {
                    "not registered"
                };
                println!("user '{user}':    {status}");
            }
        }
    }

    Ok(())
}
