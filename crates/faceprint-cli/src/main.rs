use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "faceprint", about = "faceprint face recognition CLI")]
struct Cli {
    /// Talk to the daemon on the system bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face image under a label
    Enroll {
        /// Identity label (e.g., "alice")
        #[arg(short, long)]
        label: String,
        /// PNG or JPEG image containing one face
        file: PathBuf,
    },
    /// Recognize the faces in an image
    Recognize {
        file: PathBuf,
        /// Detection strategy: hog, cnn, custom_hog or lbp
        #[arg(short, long)]
        strategy: Option<String>,
        /// Descriptor: embedding or hand_engineered
        #[arg(short, long)]
        encoder: Option<String>,
        /// Use the trained classifier instead of nearest-neighbour matching
        #[arg(long)]
        classifier: bool,
        /// Write an annotated copy of the image
        #[arg(long)]
        annotate: bool,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        label: String,
    },
    /// Train the classifier on the enrolled images
    Train {
        #[arg(long)]
        epochs: Option<u32>,
        #[arg(long)]
        batch_size: Option<u32>,
    },
    /// Show daemon status
    Status,
}

#[zbus::proxy(
    interface = "org.faceprint.Faceprint1",
    default_service = "org.faceprint.Faceprint1",
    default_path = "/org/faceprint/Faceprint1"
)]
trait Faceprint {
    async fn enroll(&self, label: &str, image: Vec<u8>) -> zbus::Result<()>;
    async fn recognize(
        &self,
        image: Vec<u8>,
        strategy: &str,
        encoder: &str,
        use_classifier: bool,
        annotate: bool,
    ) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<Vec<String>>;
    async fn delete_identity(&self, label: &str) -> zbus::Result<()>;
    async fn train_classifier(&self, epochs: u32, batch_size: u32) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    tracing::debug!(system_bus = cli.system, "connecting to faceprintd");
    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("cannot connect to D-Bus")?;
    let proxy = FaceprintProxy::new(&conn).await?;

    match cli.command {
        Commands::Enroll { label, file } => {
            let image = read_image(&file)?;
            tracing::debug!(%label, bytes = image.len(), "sending enroll");
            proxy.enroll(&label, image).await?;
            println!("Enrolled {label}");
        }
        Commands::Recognize {
            file,
            strategy,
            encoder,
            classifier,
            annotate,
        } => {
            let image = read_image(&file)?;
            let json = proxy
                .recognize(
                    image,
                    strategy.as_deref().unwrap_or(""),
                    encoder.as_deref().unwrap_or(""),
                    classifier,
                    annotate,
                )
                .await?;
            print_recognition(&json)?;
        }
        Commands::List => {
            let labels = proxy.list_identities().await?;
            if labels.is_empty() {
                println!("No identities enrolled");
            }
            for label in labels {
                println!("{label}");
            }
        }
        Commands::Remove { label } => {
            proxy.delete_identity(&label).await?;
            println!("Removed {label}");
        }
        Commands::Train { epochs, batch_size } => {
            println!("Training classifier...");
            let json = proxy
                .train_classifier(epochs.unwrap_or(0), batch_size.unwrap_or(0))
                .await?;
            let report: serde_json::Value = serde_json::from_str(&json)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status => {
            let json = proxy.status().await?;
            let status: serde_json::Value = serde_json::from_str(&json)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))
}

fn print_recognition(json: &str) -> Result<()> {
    let result: serde_json::Value = serde_json::from_str(json)?;
    let faces = result["faces"].as_array().cloned().unwrap_or_default();
    if faces.is_empty() {
        println!("No faces detected");
    }
    for face in &faces {
        let bbox = &face["bbox"];
        let label = face["label"].as_str().unwrap_or("-");
        let confidence = face["confidence"].as_f64().unwrap_or(0.0);
        print!(
            "{label} ({confidence:.3}) at top={} right={} bottom={} left={} via {}",
            bbox["top"], bbox["right"], bbox["bottom"], bbox["left"], face["method"].as_str().unwrap_or("?")
        );
        match face["error"].as_str() {
            Some(err) => println!(" [error: {err}]"),
            None => println!(),
        }
    }
    if let Some(path) = result["annotated_path"].as_str() {
        println!("Annotated image: {path}");
    }
    Ok(())
}
