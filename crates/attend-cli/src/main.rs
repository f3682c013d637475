use anyhow::{bail, Context, Result};
use attend_core::{
    CaptureWorkflow, FileExporter, HttpApi, Notice, Outcome, Phase, RecognitionApi,
    RegistrationForm, ReportEngine, ReportFilter, WorkflowState,
};
use attend_hw::{
    CameraBackend, CameraConstraints, CameraSession, StillImageBackend, V4lBackend, V4lCamera,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "attend", about = "Face-recognition attendance client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the recognition backend is up
    Health,
    /// Register a new student from a camera capture
    Register {
        /// Student's full name
        #[arg(short, long)]
        name: String,
        /// Unique student ID
        #[arg(short = 'i', long)]
        student_id: String,
        /// Use this picture instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Mark attendance for whoever is in front of the camera
    Mark {
        /// Use this picture instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Show attendance records and today's statistics
    Report {
        /// Only records for this student ID
        #[arg(long)]
        student: Option<String>,
        /// Only records on this date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_iso_date)]
        date: Option<String>,
        /// Print the filtered records as JSON
        #[arg(long)]
        json: bool,
    },
    /// List registered students
    Students,
    /// Export the filtered records as CSV
    Export {
        #[arg(long)]
        student: Option<String>,
        #[arg(long, value_parser = parse_iso_date)]
        date: Option<String>,
        /// Output directory (default: ATTEND_EXPORT_DIR or the current directory)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let api = HttpApi::with_timeout(&config.api_url, config.request_timeout())
        .context("failed to build HTTP client")?;
    tracing::debug!(api = %config.api_url, "attend starting");

    match cli.command {
        Commands::Health => {
            let health = api
                .health()
                .await
                .with_context(|| format!("backend unreachable at {}", config.api_url))?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Commands::Register {
            name,
            student_id,
            image,
        } => {
            let form = RegistrationForm::new(name, student_id);
            let workflow = CaptureWorkflow::registration(api);
            workflow.set_form(form);
            match image {
                Some(path) => {
                    capture_and_submit(&workflow, StillImageBackend::from_path(path), &config)
                        .await?
                }
                None => capture_and_submit(&workflow, v4l_backend(&config), &config).await?,
            }
        }
        Commands::Mark { image } => {
            let workflow = CaptureWorkflow::attendance(api);
            match image {
                Some(path) => {
                    capture_and_submit(&workflow, StillImageBackend::from_path(path), &config)
                        .await?
                }
                None => capture_and_submit(&workflow, v4l_backend(&config), &config).await?,
            }
        }
        Commands::Report {
            student,
            date,
            json,
        } => {
            let engine = load_reports(api).await?;
            let view = engine.view(&ReportFilter::new(student, date))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&view.filtered)?);
                return Ok(());
            }
            println!(
                "{:<12} {:<28} {:<12} {:<10}",
                "STUDENT ID", "NAME", "DATE", "TIME"
            );
            for r in &view.filtered {
                println!(
                    "{:<12} {:<28} {:<12} {:<10}",
                    r.student_id, r.name, r.date, r.time
                );
            }
            println!();
            println!(
                "{} record(s) shown, {} student(s) seen, {} date(s)",
                view.filtered.len(),
                view.unique_students.len(),
                view.unique_dates.len()
            );
            println!(
                "Today: {} of {} students present ({:.1}%)",
                view.today_count, view.total_students, view.attendance_rate
            );
        }
        Commands::Students => {
            let engine = load_reports(api).await?;
            let snapshot = engine.snapshot().context("reports not loaded")?;
            for s in &snapshot.students {
                println!("{:<12} {}", s.student_id, s.name);
            }
            println!("{} student(s) registered", snapshot.students.len());
        }
        Commands::Export {
            student,
            date,
            out_dir,
        } => {
            let engine = load_reports(api).await?;
            let exporter = FileExporter::new(out_dir.unwrap_or_else(|| config.export_dir.clone()));
            let filename = engine.export(
                &ReportFilter::new(student, date),
                &exporter,
                chrono::Local::now(),
            )?;
            println!("{}", exporter.dir().join(filename).display());
        }
        Commands::Devices => {
            let devices = V4lCamera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

fn v4l_backend(config: &Config) -> V4lBackend {
    V4lBackend::new(config.camera_device.clone(), config.camera_env_device.clone())
        .with_warmup_frames(config.warmup_frames)
}

/// Open the camera, take one still, release the camera, then submit.
async fn capture_and_submit<A: RecognitionApi, B: CameraBackend>(
    workflow: &CaptureWorkflow<A>,
    backend: B,
    config: &Config,
) -> Result<()> {
    spawn_ctrl_c_cancel(workflow.cancellation_token());

    let constraints: CameraConstraints = config.constraints();
    let (mut camera, mut events) = CameraSession::new(backend);
    let opened = camera.initialize(constraints).await;
    workflow.drain_camera_events(&mut events);
    if let Err(e) = opened {
        print_notice(workflow.notice());
        bail!("camera unavailable: {e}");
    }

    workflow.request_capture(&mut camera)?;
    camera.teardown();
    print_notice(workflow.notice());

    let phase = workflow.submit().await?;
    print_notice(workflow.notice());

    match (phase, workflow.state()) {
        (Phase::Succeeded, WorkflowState::Succeeded { outcome }) => {
            if let Outcome::Attended(receipt) = outcome {
                if let Some(student) = &receipt.student {
                    println!(
                        "{} ({})  {}  at {}",
                        student.name,
                        student.student_id,
                        student.match_label(),
                        receipt.marked_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
            Ok(())
        }
        (_, WorkflowState::Failed { message, .. }) => bail!(message),
        (phase, _) => bail!("workflow ended in unexpected phase: {phase}"),
    }
}

async fn load_reports(api: HttpApi) -> Result<ReportEngine<HttpApi>> {
    let engine = ReportEngine::new(api);
    spawn_ctrl_c_cancel(engine.cancellation_token());
    engine.load().await.context("failed to load reports")?;
    Ok(engine)
}

fn print_notice(notice: Option<Notice>) {
    if let Some(n) = notice {
        println!("[{}] {}", n.kind.label(), n.text);
    }
}

fn parse_iso_date(s: &str) -> Result<String, String> {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

/// Cancel `token` when the user hits Ctrl-C.
fn spawn_ctrl_c_cancel(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted; cancelling");
            token.cancel();
        }
    });
}
