use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::attendance::{compute_attendance, AttendanceStatus, ObservedImage};
use rollcall_core::dataset::{embed_dataset, embed_roster, find_images};
use rollcall_core::evaluator::{evaluate, DEFAULT_SEED, DEFAULT_TEST_FRACTION};
use rollcall_core::table::{load_embeddings, save_attendance, save_embeddings};
use rollcall_core::{
    analyzer, embed_primary, CosineMatcher, EmbedOutcome, FaceAnalyzer, Matcher, OnnxFaceAnalyzer, Threshold,
};
use std::path::{Path, PathBuf};

mod live;

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Face recognition and classroom attendance")]
struct Cli {
    /// Directory holding det_10g.onnx and w600k_r50.onnx
    /// (default: $ROLLCALL_MODEL_DIR or ~/.local/share/rollcall/models)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed every image of a labeled dataset (one folder per person) into a CSV table
    Embed {
        #[arg(short, long, default_value = "data/Faces")]
        dataset: PathBuf,
        #[arg(short, long, default_value = "face_embeddings.csv")]
        output: PathBuf,
        /// Worker threads, each with its own model instance
        #[arg(short, long, default_value_t = 2)]
        workers: usize,
    },
    /// Identify the face in one image against an embedding table
    Identify {
        #[arg(short, long, default_value = "face_embeddings.csv")]
        table: PathBuf,
        #[arg(short, long, default_value = "data/test.jpg")]
        image: PathBuf,
        /// Minimum cosine similarity for a match
        #[arg(long, default_value_t = 0.5)]
        threshold: f32,
    },
    /// Stratified train/test accuracy report over an embedding table
    Evaluate {
        #[arg(short, long, default_value = "face_embeddings.csv")]
        table: PathBuf,
        #[arg(long, default_value_t = DEFAULT_TEST_FRACTION)]
        test_fraction: f64,
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Recognize faces from a webcam until Ctrl-C
    Live {
        #[arg(short, long, default_value = "face_embeddings.csv")]
        table: PathBuf,
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        #[arg(long, default_value_t = 0.5)]
        threshold: f32,
        /// Where the latest annotated frame is written
        #[arg(short, long, default_value = "live.png")]
        output: PathBuf,
        /// Write the annotated frame every N frames
        #[arg(long, default_value_t = 15)]
        save_every: u64,
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,
    },
    /// Mark a roster Present/Absent from a folder of classroom photos
    Attendance {
        /// One image per student, file name = student name
        #[arg(short, long, default_value = "known_faces")]
        roster: PathBuf,
        #[arg(short, long, default_value = "classroom_photos")]
        photos: PathBuf,
        #[arg(short, long, default_value = "attendance.csv")]
        output: PathBuf,
        /// Cosine distance tolerance; similarity must exceed 1 - tolerance
        #[arg(long, default_value_t = 0.65)]
        tolerance: f32,
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
    let model_dir = cli.model_dir.unwrap_or_else(rollcall_core::default_model_dir);

    match cli.command {
        Commands::Embed {
            dataset,
            output,
            workers,
        } => {
            if workers == 0 {
                bail!("--workers must be at least 1");
            }
            let analyzers = (0..workers)
                .map(|_| load_analyzer(&model_dir))
                .collect::<Result<Vec<_>>>()?;
            let report = tokio::task::spawn_blocking(move || embed_dataset(&dataset, analyzers))
                .await?
                .context("embedding dataset")?;

            for skipped in &report.skipped {
                println!("Skipped {}: {}", skipped.path.display(), skipped.reason);
            }
            save_embeddings(&output, &report.gallery)?;
            println!(
                "Embedded {} images ({} via whole-image fallback, {} skipped); saved to {}",
                report.gallery.len(),
                report.fallback.len(),
                report.skipped.len(),
                output.display()
            );
        }
        Commands::Identify {
            table,
            image,
            threshold,
        } => {
            let gallery = load_embeddings(&table).with_context(|| format!("loading {}", table.display()))?;
            let mut analyzer = load_analyzer(&model_dir)?;
            let rgb = analyzer::load_rgb(&image)?;

            let outcome = embed_primary(&mut analyzer, &rgb);
            match &outcome {
                EmbedOutcome::Detected(face) => {
                    println!("Face detected (detector score {:.2}).", face.bbox.confidence)
                }
                EmbedOutcome::FallbackUsed(_) => {
                    println!("No face detected; fallback whole-image embedding used.")
                }
                EmbedOutcome::Failed(reason) => bail!("could not embed {}: {reason}", image.display()),
            }
            let Some(probe) = outcome.into_embedding() else {
                bail!("could not embed {}", image.display());
            };

            let result = CosineMatcher.compare(&probe, &gallery, Threshold::similarity(threshold))?;
            if result.accepted {
                println!("Match found: {} ({:.2}%)", result.best_label, result.confidence * 100.0);
            } else {
                println!("No confident match (confidence: {:.2}%)", result.confidence * 100.0);
            }
        }
        Commands::Evaluate {
            table,
            test_fraction,
            seed,
            json,
        } => {
            let gallery = load_embeddings(&table).with_context(|| format!("loading {}", table.display()))?;
            let samples: Vec<_> = gallery.entries().map(|e| (e.label, e.embedding)).collect();
            let report = evaluate(&CosineMatcher, &samples, test_fraction, seed)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Train/test: {}/{}", report.train_size, report.test_size);
                println!("Accuracy: {:.2}%", report.accuracy * 100.0);
                println!("Average Confidence: {:.2}%", report.mean_confidence * 100.0);
            }
        }
        Commands::Live {
            table,
            device,
            threshold,
            output,
            save_every,
            max_frames,
        } => {
            let gallery = load_embeddings(&table).with_context(|| format!("loading {}", table.display()))?;
            let analyzer = load_analyzer(&model_dir)?;
            let options = live::LiveOptions {
                device,
                threshold: Threshold::similarity(threshold),
                output,
                save_every: save_every.max(1),
                max_frames,
            };
            let stats = live::run(analyzer, gallery, options).await?;
            println!(
                "Stopped after {} frames ({} faces recognized, {} unknown)",
                stats.frames, stats.recognized, stats.unknown
            );
        }
        Commands::Attendance {
            roster,
            photos,
            output,
            tolerance,
        } => {
            let mut analyzer = load_analyzer(&model_dir)?;
            let roster_report = embed_roster(&roster, &mut analyzer)
                .with_context(|| format!("loading roster from {}", roster.display()))?;
            for skipped in &roster_report.skipped {
                println!("Roster image skipped {}: {}", skipped.path.display(), skipped.reason);
            }

            let listing = find_images(&photos)?;
            for skipped in &listing.unreadable {
                println!("Photo entry skipped {}: {}", skipped.path.display(), skipped.reason);
            }
            let mut observed = Vec::new();
            for path in listing.images {
                let faces = analyzer::load_rgb(&path)
                    .map_err(anyhow::Error::from)
                    .and_then(|rgb| analyzer.detect(&rgb).map_err(anyhow::Error::from));
                match faces {
                    Ok(faces) => observed.push(ObservedImage {
                        image_id: path.display().to_string(),
                        faces,
                    }),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping photo"),
                }
            }

            let records = compute_attendance(
                &CosineMatcher,
                &roster_report.gallery,
                &observed,
                Threshold::from_distance(tolerance),
            )?;
            save_attendance(&output, &records)?;

            for record in &records {
                println!("{:<24} {}", record.name, record.attendance.as_str());
            }
            let present = records
                .iter()
                .filter(|r| r.attendance == AttendanceStatus::Present)
                .count();
            println!(
                "{present}/{} present across {} photos; saved to {}",
                records.len(),
                observed.len(),
                output.display()
            );
        }
        Commands::Devices => {
            let devices = rollcall_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

fn load_analyzer(model_dir: &Path) -> Result<OnnxFaceAnalyzer> {
    OnnxFaceAnalyzer::load(model_dir).with_context(|| format!("loading face models from {}", model_dir.display()))
}
