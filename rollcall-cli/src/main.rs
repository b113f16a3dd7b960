use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use clap::{Parser, Subcommand};
use rollcall_core::{
    camera::Camera,
    config::Config,
    controller::AttendanceController,
    credential::CredentialGate,
    encoder::CommandEncoder,
    ledger::{AttendanceLog, Ledger, LedgerError, LOG_TIME_FORMAT},
    session::{Feedback, FeedbackKind, RunFlag, SessionState},
    store::{BlobStore, RecordStore},
    AttendanceKiosk, StopReason,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(about = "Face recognition attendance kiosk", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read configuration from this file instead of the default locations
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the attendance kiosk
    Run {
        /// Camera index (defaults to the first working camera)
        #[arg(long)]
        camera: Option<usize>,
        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,
    },
    /// List working camera indices
    Cameras,
    /// Import a folder of reference images, one person per file
    Import {
        /// Folder containing .png/.jpg/.jpeg files named after each person
        folder: PathBuf,
    },
    /// List imported people
    People,
    /// Record attendance for a person by name, without the camera
    Mark {
        name: String,
        /// Time of the attempt, "YYYY-MM-DD HH:MM:SS" (defaults to now)
        #[arg(long)]
        at: Option<String>,
    },
    /// Show the last status of everyone in the attendance log
    Status,
    /// Copy the attendance log after verifying the admin password
    Export {
        /// Destination file
        output: PathBuf,
    },
    /// Show configuration
    Config {
        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let config = match &cli.config {
        Some(path) => {
            let config = Config::load_from_path(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            config.validate()?;
            config
        }
        None => Config::load()?,
    };

    match cli.command {
        Commands::Run { camera, frames } => cmd_run(&config, camera, frames),
        Commands::Cameras => cmd_cameras(&config),
        Commands::Import { folder } => cmd_import(&config, folder),
        Commands::People => cmd_people(&config),
        Commands::Mark { name, at } => cmd_mark(&config, name, at),
        Commands::Status => cmd_status(&config),
        Commands::Export { output } => cmd_export(&config, output),
        Commands::Config { validate } => cmd_config(&config, validate),
    }
}

fn open_records(config: &Config) -> anyhow::Result<RecordStore> {
    RecordStore::open(&config.storage.database_path).with_context(|| {
        format!(
            "Failed to open database {}",
            config.storage.database_path.display()
        )
    })
}

fn cmd_run(config: &Config, camera: Option<usize>, frames: Option<u64>) -> anyhow::Result<()> {
    let records = open_records(config)?;
    let mut encoder = CommandEncoder::new(&config.recognition.command, config.recognition.args.clone());

    println!("Loading known faces...");
    let mut kiosk = AttendanceKiosk::from_config(config, records, &mut encoder)?;
    println!("{} known face(s)", kiosk.catalog().len());

    let mut source = rollcall_core::open_camera(&config.camera, camera)?;
    println!("Using camera {}", source.index());

    let run = RunFlag::new(true);
    let mut session = SessionState::new(run.clone()).with_display(print_feedback);
    if let Some(limit) = frames {
        session = session.with_frame_limit(limit);
    }

    // Enter (or end of input) stops the loop after the current frame
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        run.stop();
    });
    println!("Camera running. Press Enter to stop.\n");

    let summary = kiosk.run(&mut source, &mut encoder, &mut session, || {
        Local::now().naive_local()
    });

    println!();
    match &summary.stop_reason {
        StopReason::Stopped => println!("⏹️  Camera stopped"),
        StopReason::FrameLimit => println!("⏹️  Frame limit reached"),
        StopReason::CaptureFailed(reason) => println!("❌ Camera read failed: {}", reason),
    }
    println!(
        "Frames: {}  Faces: {}  Recorded: {}  Rejected: {}  Unknown: {}  Errors: {}",
        summary.frames,
        summary.faces,
        summary.accepted,
        summary.rejected,
        summary.unknown,
        summary.errors
    );

    Ok(())
}

fn print_feedback(feedback: &Feedback) {
    let marker = match feedback.kind {
        FeedbackKind::Success => "✅",
        FeedbackKind::Warning => "⚠️ ",
        FeedbackKind::Error => "❌",
    };
    println!(
        "{} {}  [{}]",
        marker,
        feedback.message,
        Local::now().format(LOG_TIME_FORMAT)
    );
}

fn cmd_cameras(config: &Config) -> anyhow::Result<()> {
    let indices = Camera::available_indices(config.camera.max_index, &config.camera);

    if indices.is_empty() {
        println!("No working camera found. Please connect a camera.");
        return Ok(());
    }

    println!("Working cameras:");
    for index in indices {
        println!("  {} (/dev/video{})", index, index);
    }
    Ok(())
}

fn cmd_import(config: &Config, folder: PathBuf) -> anyhow::Result<()> {
    println!("Importing reference images from: {}", folder.display());

    let records = open_records(config)?;
    let blobs = BlobStore::new(&config.storage.blob_dir);
    let imported = rollcall_core::import::import_folder(&folder, &blobs, &records)?;

    for person in &imported {
        println!("Uploaded {} with ID: {}", person.name, person.image);
    }
    println!("\n✓ Imported {} image(s)", imported.len());
    Ok(())
}

fn cmd_people(config: &Config) -> anyhow::Result<()> {
    let records = open_records(config)?;
    let people = records.people()?;

    if people.is_empty() {
        println!("No people imported yet");
        return Ok(());
    }

    println!("{:<6} {:<24} {}", "ID", "Name", "Image");
    println!("{}", "-".repeat(96));
    for person in people {
        let image = person
            .image
            .map(|id| id.to_string())
            .unwrap_or_else(|| "—".to_string());
        println!("{:<6} {:<24} {}", person.id, person.name, image);
    }
    Ok(())
}

fn cmd_mark(config: &Config, name: String, at: Option<String>) -> anyhow::Result<()> {
    let now = match at {
        Some(text) => NaiveDateTime::parse_from_str(&text, LOG_TIME_FORMAT)
            .with_context(|| format!("Invalid time '{}', expected YYYY-MM-DD HH:MM:SS", text))?,
        None => Local::now().naive_local(),
    };

    let records = open_records(config)?;
    let log = AttendanceLog::new(&config.storage.log_path);
    let ledger = Ledger::new(log, Box::new(records));
    let mut controller =
        AttendanceController::new(ledger, config.cooldown()?, config.attendance.cache_status)?;

    let decision = controller.decide(&name, now)?;
    if decision.accepted {
        println!("✅ {}", decision.message);
        if !decision.mirrored {
            println!("⚠️  Event is in the attendance log but was not mirrored to the database");
        }
    } else {
        println!("⚠️  {}", decision.message);
    }
    Ok(())
}

fn cmd_status(config: &Config) -> anyhow::Result<()> {
    let log = AttendanceLog::new(&config.storage.log_path);
    let table = log.last_statuses()?;

    if table.is_empty() {
        println!("No attendance records yet");
        return Ok(());
    }

    println!("{:<24} {:<12} {}", "Name", "Status", "Since");
    println!("{}", "-".repeat(60));
    for (name, last) in table.sorted() {
        println!(
            "{:<24} {:<12} {}",
            name,
            last.status,
            last.time.format(LOG_TIME_FORMAT)
        );
    }
    Ok(())
}

fn cmd_export(config: &Config, output: PathBuf) -> anyhow::Result<()> {
    let records = open_records(config)?;

    let password = rpassword::prompt_password("Enter admin password: ")?;
    if !CredentialGate::new(&records).verify(&password)? {
        anyhow::bail!("Incorrect password");
    }
    println!("✅ Password verified!");

    let log = AttendanceLog::new(&config.storage.log_path);
    match log.export_to(&output) {
        Ok(bytes) => {
            println!("📥 Attendance exported to {} ({} bytes)", output.display(), bytes);
            Ok(())
        }
        Err(LedgerError::NoRecords) => {
            println!("❗ {} not found. No records yet.", log.path().display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_config(config: &Config, validate: bool) -> anyhow::Result<()> {
    if validate {
        config.validate()?;
        println!("✓ Configuration is valid");
        return Ok(());
    }

    println!("Configuration:");
    println!();

    println!("[camera]");
    match config.camera.index {
        Some(index) => println!("  index = {}", index),
        None => println!("  index = (first working camera)"),
    }
    println!("  resolution = {}x{}", config.camera.width, config.camera.height);
    println!("  max_index = {}", config.camera.max_index);
    println!();

    println!("[recognition]");
    println!("  command = {:?}", config.recognition.command);
    println!("  args = {:?}", config.recognition.args);
    println!("  threshold = {}", config.recognition.threshold);
    println!();

    println!("[attendance]");
    println!("  cooldown = {}s", config.attendance.cooldown_secs);
    println!("  cache_status = {}", config.attendance.cache_status);
    println!();

    println!("[storage]");
    println!("  log_path = {:?}", config.storage.log_path);
    println!("  database_path = {:?}", config.storage.database_path);
    println!("  blob_dir = {:?}", config.storage.blob_dir);
    println!();

    println!("[debug]");
    println!("  save_frames = {}", config.debug.save_frames);
    println!("  output_dir = {:?}", config.debug.output_dir);

    Ok(())
}
