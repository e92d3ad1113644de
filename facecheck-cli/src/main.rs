use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use facecheck_core::config::{Config, ConfigSource};
use facecheck_core::ocr::{CommandOcr, OcrEngine};
use facecheck_core::{
    CompareRequest, FaceRegion, Image, PipelineContext, ReferenceGallery, RegionSelection,
    VerificationOutcome, VerificationService,
};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facecheck")]
#[command(about = "Face embedding extraction and identity verification", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the system and user config files)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show model status
    Info {
        #[arg(long)]
        json: bool,
    },
    /// Extract an embedding from an image
    Extract {
        image: PathBuf,
        /// Crop to x,y,width,height before extracting
        #[arg(short, long, conflicts_with = "detect")]
        region: Option<FaceRegion>,
        /// Crop to a detected face
        #[arg(short, long)]
        detect: bool,
        /// Which face to use when several are detected: largest, most-confident, first
        #[arg(long, default_value = "largest")]
        select: RegionSelection,
        /// Write the embedding to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Compare two stored embeddings
    Compare {
        first: PathBuf,
        second: PathBuf,
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Verify that two images show the same person
    Verify {
        reference: PathBuf,
        candidate: PathBuf,
        #[arg(short, long)]
        threshold: Option<f32>,
        #[arg(long)]
        json: bool,
    },
    /// Verify a JSON request {"reference_image", "test_image", "threshold"?} of data URLs
    VerifyRequest {
        /// Request file, or - for stdin
        request: PathBuf,
    },
    /// Detect faces in an image
    Detect {
        image: PathBuf,
        /// Save a copy of the image with detections outlined
        #[arg(short, long)]
        annotate: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Enroll a reference face for a subject
    Enroll {
        subject: String,
        image: PathBuf,
        /// Optional label for this reference
        #[arg(short, long)]
        label: Option<String>,
        #[arg(short, long)]
        region: Option<FaceRegion>,
    },
    /// Verify an image against a subject's enrolled references
    Identify {
        subject: String,
        image: PathBuf,
        #[arg(short, long)]
        threshold: Option<f32>,
        #[arg(long)]
        json: bool,
    },
    /// List a subject's enrolled references
    List { subject: String },
    /// Remove an enrolled reference
    Remove { subject: String, face_id: String },
    /// Extract text from a document image
    Ocr {
        image: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Run the pipeline on a synthetic image
    Demo,
    /// Show configuration
    Config {
        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let config = Config::load(cli.config.as_deref())?;
    match &cli.config {
        Some(path) => log::debug!("Using configuration from {}", path.display()),
        None => log::debug!("Using configuration from the default search path"),
    }

    match cli.command {
        Commands::Info { json } => cmd_info(&config, json),
        Commands::Extract {
            image,
            region,
            detect,
            select,
            output,
            json,
        } => cmd_extract(&config, &image, region, detect.then_some(select), output, json),
        Commands::Compare {
            first,
            second,
            threshold,
        } => cmd_compare(&config, &first, &second, threshold),
        Commands::Verify {
            reference,
            candidate,
            threshold,
            json,
        } => cmd_verify(&config, &reference, &candidate, threshold, json),
        Commands::VerifyRequest { request } => cmd_verify_request(&config, &request),
        Commands::Detect {
            image,
            annotate,
            json,
        } => cmd_detect(&config, &image, annotate, json),
        Commands::Enroll {
            subject,
            image,
            label,
            region,
        } => cmd_enroll(&config, &subject, &image, label, region),
        Commands::Identify {
            subject,
            image,
            threshold,
            json,
        } => cmd_identify(&config, &subject, &image, threshold, json),
        Commands::List { subject } => cmd_list(&config, &subject),
        Commands::Remove { subject, face_id } => cmd_remove(&config, &subject, &face_id),
        Commands::Ocr { image, json } => cmd_ocr(&config, &image, json),
        Commands::Demo => cmd_demo(&config),
        Commands::Config { validate } => cmd_config(&config, validate),
    }
}

fn load_service(config: &Config) -> anyhow::Result<VerificationService> {
    let context = PipelineContext::initialize(config).context("Failed to initialize pipeline")?;
    log::debug!("Reference gallery at {}", config.storage.gallery_path.display());
    Ok(VerificationService::new(context).with_gallery(ReferenceGallery::new(
        &config.storage.gallery_path,
    )))
}

fn print_outcome(outcome: &VerificationOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else if outcome.is_match {
        println!("✅ {}", outcome.message);
    } else {
        println!("❌ {}", outcome.message);
    }
    Ok(())
}

fn cmd_info(config: &Config, json: bool) -> anyhow::Result<()> {
    let service = load_service(config)?;
    let status = service.status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Model: {}", status.model);
    println!("Architecture: {}", status.architecture);
    println!(
        "Input: {}x{}x{}",
        status.input_size[0], status.input_size[1], status.input_size[2]
    );
    println!("Output dimensions: {}", status.output_dimensions);
    if status.default_config {
        println!("Model config: defaults (config file missing or unreadable)");
    }
    println!(
        "Face detector: {}",
        if status.detector { "loaded" } else { "not configured" }
    );
    Ok(())
}

fn cmd_extract(
    config: &Config,
    image_path: &Path,
    region: Option<FaceRegion>,
    selection: Option<RegionSelection>,
    output: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let service = load_service(config)?;
    let image = Image::open(image_path)?;

    let (embedding, summary) = match selection {
        Some(selection) => {
            let start = std::time::Instant::now();
            let embedding = service.extract_detected(&image, selection)?;
            let summary = facecheck_core::service::ExtractionSummary::new(
                &embedding,
                start.elapsed().as_secs_f64() * 1000.0,
            );
            (embedding, summary)
        }
        None => service.summarize(&image, region.as_ref())?,
    };

    if let Some(path) = &output {
        service.save_embedding(&embedding, path)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("✓ Extracted {}-dimensional embedding", summary.dimension);
        println!("First values: {:?}", summary.leading_values);
        println!("Processing time: {:.2}ms", summary.elapsed_ms);
        if let Some(path) = output {
            println!("Saved to: {}", path.display());
        }
    }
    Ok(())
}

fn cmd_compare(
    config: &Config,
    first: &Path,
    second: &Path,
    threshold: Option<f32>,
) -> anyhow::Result<()> {
    let a = facecheck_core::load_embedding(first)?;
    let b = facecheck_core::load_embedding(second)?;
    let threshold = threshold.unwrap_or(config.matching.threshold);

    let result = facecheck_core::compare(&a, &b, threshold)?;
    println!(
        "Similarity: {:.3} (threshold {:.2}) → {}",
        result.similarity,
        threshold,
        if result.is_match { "match" } else { "no match" }
    );
    Ok(())
}

fn cmd_verify(
    config: &Config,
    reference: &Path,
    candidate: &Path,
    threshold: Option<f32>,
    json: bool,
) -> anyhow::Result<()> {
    let service = load_service(config)?;
    let threshold = threshold.unwrap_or(config.matching.threshold);

    let reference = std::fs::read(reference)
        .with_context(|| format!("Failed to read {}", reference.display()))?;
    let candidate = std::fs::read(candidate)
        .with_context(|| format!("Failed to read {}", candidate.display()))?;

    let outcome = service.verify_encoded(&reference, &candidate, threshold);
    print_outcome(&outcome, json)
}

fn cmd_verify_request(config: &Config, request_path: &Path) -> anyhow::Result<()> {
    let contents = if request_path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(request_path)
            .with_context(|| format!("Failed to read {}", request_path.display()))?
    };
    let request: CompareRequest =
        serde_json::from_str(&contents).context("Invalid verification request")?;

    let service = load_service(config)?;
    let outcome = service.verify_request(&request, config.matching.threshold);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn cmd_detect(
    config: &Config,
    image_path: &Path,
    annotate: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    if config.detection.model_path.is_none() {
        bail!("No face detection model configured ([detection] model_path)");
    }

    let service = load_service(config)?;
    let Some(detector) = service.context().detector() else {
        bail!("Face detector failed to load");
    };

    let image = Image::open(image_path)?;
    let detections = detector.detect(&image)?;
    log::debug!("{} detections in {}", detections.len(), image_path.display());

    if json {
        println!("{}", serde_json::to_string_pretty(&detections)?);
    } else if detections.is_empty() {
        println!("No faces detected");
    } else {
        println!("{:<5} {:<22} {}", "#", "Region", "Confidence");
        println!("{}", "-".repeat(40));
        for (idx, detection) in detections.iter().enumerate() {
            println!(
                "{:<5} {:<22} {:.3}",
                idx,
                detection.region.to_string(),
                detection.confidence
            );
        }
    }

    if let Some(path) = annotate {
        let mut canvas: RgbImage = image.raster().clone();
        for detection in &detections {
            let region = detection.region;
            let rect = Rect::at(region.x as i32, region.y as i32).of_size(region.width, region.height);
            draw_hollow_rect_mut(&mut canvas, rect, Rgb([0, 255, 0]));
        }
        canvas
            .save(&path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        println!("📷 Annotated image saved to: {}", path.display());
    }
    Ok(())
}

fn cmd_enroll(
    config: &Config,
    subject: &str,
    image_path: &Path,
    label: Option<String>,
    region: Option<FaceRegion>,
) -> anyhow::Result<()> {
    println!("Enrolling reference for subject: {}", subject);
    if let Some(ref l) = label {
        println!("Label: {}", l);
    }

    let service = load_service(config)?;
    let image = Image::open(image_path)?;
    let face_id = service.enroll(subject, &image, region.as_ref(), label)?;

    println!("\n✓ Reference enrolled successfully!");
    println!("Face ID: {}", face_id);
    Ok(())
}

fn cmd_identify(
    config: &Config,
    subject: &str,
    image_path: &Path,
    threshold: Option<f32>,
    json: bool,
) -> anyhow::Result<()> {
    let service = load_service(config)?;
    let threshold = threshold.unwrap_or(config.matching.threshold);
    let image = Image::open(image_path)?;

    let outcome = service.verify_subject(subject, &image, threshold);
    print_outcome(&outcome, json)
}

fn cmd_list(config: &Config, subject: &str) -> anyhow::Result<()> {
    let gallery = ReferenceGallery::new(&config.storage.gallery_path);
    let faces = gallery.list(subject)?;

    if faces.is_empty() {
        println!("No references enrolled for subject: {}", subject);
        return Ok(());
    }

    println!("Enrolled references for {}:", subject);
    println!();
    println!("{:<15} {:<20} {:<6} {}", "Face ID", "Label", "Dim", "Enrolled At");
    println!("{}", "-".repeat(66));

    for face in faces {
        let label = face.label.unwrap_or_else(|| "—".to_string());
        let enrolled_at = face.enrolled_at.format("%Y-%m-%d %H:%M:%S");
        println!(
            "{:<15} {:<20} {:<6} {}",
            face.id, label, face.dimension, enrolled_at
        );
    }
    Ok(())
}

fn cmd_remove(config: &Config, subject: &str, face_id: &str) -> anyhow::Result<()> {
    println!("Removing reference {} for subject: {}", face_id, subject);

    let gallery = ReferenceGallery::new(&config.storage.gallery_path);
    gallery.remove(subject, face_id)?;

    println!("✓ Reference removed successfully");
    Ok(())
}

fn cmd_ocr(config: &Config, image_path: &Path, json: bool) -> anyhow::Result<()> {
    let engine = CommandOcr::new(&config.ocr);
    let output = engine.recognize(image_path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Found {} text regions in {:.2}s", output.results.len(), output.processing_time);
    for text_box in &output.results {
        println!("  {:<40} {:.2}", text_box.text, text_box.confidence);
    }
    if !output.extracted_text.is_empty() {
        println!("\nText: {}", output.extracted_text);
    }
    Ok(())
}

/// 112x112 gradient used to exercise the pipeline without a real photo
fn synthetic_image() -> Image {
    let mut raster = RgbImage::new(112, 112);
    for (x, y, pixel) in raster.enumerate_pixels_mut() {
        *pixel = Rgb([(255 * y / 112) as u8, (255 * x / 112) as u8, 128]);
    }
    Image::from_rgb(raster)
}

fn cmd_demo(config: &Config) -> anyhow::Result<()> {
    let service = load_service(config)?;
    let image = synthetic_image();

    let (embedding, summary) = service.summarize(&image, None)?;
    println!("✓ Extracted {}-dimensional embedding", summary.dimension);
    println!("First values: {:?}", summary.leading_values);
    println!("Processing time: {:.2}ms", summary.elapsed_ms);
    println!("Norm: {:.6}", embedding.norm());

    let outcome = service.verify(&image, &image, config.matching.threshold);
    println!("Self-verification: {}", outcome.message);
    Ok(())
}

fn cmd_config(config: &Config, validate: bool) -> anyhow::Result<()> {
    if validate {
        config.validate()?;
        let (_, source) = facecheck_core::ModelConfig::load(&config.embedding.config_path)?;
        if source == ConfigSource::Defaults {
            println!(
                "⚠ Model config {} not usable, defaults will be applied",
                config.embedding.config_path.display()
            );
        }
        println!("✓ Configuration is valid");
        return Ok(());
    }

    println!("Configuration:");
    println!();

    println!("[embedding]");
    println!("  model_path = {:?}", config.embedding.model_path);
    println!("  config_path = {:?}", config.embedding.config_path);
    println!();

    println!("[detection]");
    match &config.detection.model_path {
        Some(path) => println!("  model_path = {:?}", path),
        None => println!("  model_path = (none, full image is used)"),
    }
    println!(
        "  confidence_threshold = {}",
        config.detection.confidence_threshold
    );
    println!("  nms_threshold = {}", config.detection.nms_threshold);
    println!();

    println!("[matching]");
    println!("  threshold = {}", config.matching.threshold);
    println!();

    println!("[runtime]");
    println!("  intra_threads = {}", config.runtime.intra_threads);
    println!();

    println!("[storage]");
    println!("  gallery_path = {:?}", config.storage.gallery_path);
    println!();

    println!("[ocr]");
    println!("  program = {:?}", config.ocr.program);
    println!("  args = {:?}", config.ocr.args);

    Ok(())
}
