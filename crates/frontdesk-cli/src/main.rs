use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};
use frontdesk_core::{ArcFaceOracle, FaceOracle, ARCFACE_MODEL_FILE};
use serde_json::{json, Map, Value};

#[derive(Parser)]
#[command(name = "frontdesk", about = "frontdesk visitor face check-in CLI")]
struct Cli {
    /// Base URL of the frontdeskd daemon
    #[arg(
        long,
        env = "FRONTDESK_URL",
        default_value = "http://127.0.0.1:5000",
        global = true
    )]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a visitor photo
    Scan {
        /// Photo file (PNG or JPEG)
        image: PathBuf,
        /// Visitor name
        #[arg(short, long)]
        name: Option<String>,
        /// Visitor company
        #[arg(short, long)]
        company: Option<String>,
        /// Extra visitor info as key=value (repeatable)
        #[arg(short, long = "info", value_parser = parse_key_val)]
        info: Vec<(String, String)>,
    },
    /// Recognize a returning visitor from a photo
    Recognize {
        /// Photo file (PNG or JPEG)
        image: PathBuf,
    },
    /// List enrolled visitors
    List,
    /// Remove an enrolled visitor
    Remove {
        /// Face ID to remove
        id: String,
    },
    /// Show daemon status
    Status,
    /// Run face detection locally on a photo (bypasses the daemon)
    Detect {
        /// Photo file
        image: PathBuf,
        /// Directory containing the ONNX models
        #[arg(long, env = "FRONTDESK_MODEL_DIR")]
        model_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let base = cli.server.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Scan {
            image,
            name,
            company,
            info,
        } => {
            let body = json!({
                "image": encode_photo(&image)?,
                "visitorInfo": visitor_info(name, company, info),
            });
            let reply = call(client.post(format!("{base}/api/scan-face")).json(&body)).await?;
            println!(
                "Enrolled {} (photo saved as {})",
                reply["face_id"].as_str().unwrap_or("?"),
                reply["filename"].as_str().unwrap_or("?")
            );
        }
        Commands::Recognize { image } => {
            let body = json!({ "image": encode_photo(&image)? });
            let reply = call(client.post(format!("{base}/api/recognize-face")).json(&body)).await?;
            if reply["recognized"].as_bool().unwrap_or(false) {
                println!("Recognized {}", reply["face_id"].as_str().unwrap_or("?"));
                println!("{}", serde_json::to_string_pretty(&reply["visitor_info"])?);
            } else {
                println!("{}", reply["message"].as_str().unwrap_or("Not recognized"));
            }
        }
        Commands::List => {
            let reply = call(client.get(format!("{base}/api/faces"))).await?;
            let faces = reply["faces"].as_array().cloned().unwrap_or_default();
            if faces.is_empty() {
                println!("No visitors enrolled");
            }
            for face in faces {
                println!(
                    "{}  {}  {}",
                    face["face_id"].as_str().unwrap_or("?"),
                    face["created_at"].as_str().unwrap_or(""),
                    face["visitor_info"]
                );
            }
        }
        Commands::Remove { id } => {
            call(client.delete(format!("{base}/api/faces/{id}"))).await?;
            println!("Removed {id}");
        }
        Commands::Status => {
            let reply = call(client.get(format!("{base}/api/status"))).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Commands::Detect { image, model_dir } => {
            let model_dir = model_dir.unwrap_or_else(frontdesk_core::default_model_dir);
            let photo = image::open(&image)
                .with_context(|| format!("opening {}", image.display()))?
                .to_rgb8();

            let mut oracle = ArcFaceOracle::load(&model_dir)?;
            let embeddings = oracle.encode(&photo)?;

            println!(
                "{}: {}x{}, {} face(s) detected",
                image.display(),
                photo.width(),
                photo.height(),
                embeddings.len()
            );
            for (i, e) in embeddings.iter().enumerate() {
                println!("  face {i}: {}-dim embedding ({ARCFACE_MODEL_FILE})", e.dim());
            }
        }
    }

    Ok(())
}

/// Send a request and return the JSON body, failing on `status: "error"`.
async fn call(request: reqwest::RequestBuilder) -> Result<Value> {
    let response = request.send().await.context("contacting frontdeskd")?;
    let http_status = response.status();
    tracing::debug!(url = %response.url(), status = http_status.as_u16(), "response received");
    let body: Value = response
        .json()
        .await
        .with_context(|| format!("decoding response (HTTP {http_status})"))?;

    if body["status"] != "success" {
        bail!(
            "frontdeskd returned HTTP {}: {}",
            http_status.as_u16(),
            body["message"].as_str().unwrap_or("unknown error")
        );
    }
    Ok(body)
}

/// Read a photo and wrap it as a `data:` URI the way browsers send it.
fn encode_photo(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mime = image::ImageFormat::from_path(path)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/jpeg");
    Ok(data_uri(mime, &bytes))
}

fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

fn visitor_info(
    name: Option<String>,
    company: Option<String>,
    extra: Vec<(String, String)>,
) -> Value {
    let mut info = Map::new();
    for (key, value) in extra {
        info.insert(key, Value::String(value));
    }
    if let Some(name) = name {
        info.insert("name".into(), Value::String(name));
    }
    if let Some(company) = company {
        info.insert("company".into(), Value::String(company));
    }
    Value::Object(info)
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{s}`"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(parse_key_val("visiting=Bob").unwrap(), ("visiting".into(), "Bob".into()));
        assert_eq!(parse_key_val("note=a=b").unwrap(), ("note".into(), "a=b".into()));
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_visitor_info_flags_override_extra() {
        let info = visitor_info(
            Some("Alice".into()),
            None,
            vec![("name".into(), "ignored".into()), ("visiting".into(), "Bob".into())],
        );
        assert_eq!(info, json!({ "name": "Alice", "visiting": "Bob" }));
    }

    #[test]
    fn test_data_uri() {
        assert_eq!(data_uri("image/png", b"abc"), "data:image/png;base64,YWJj");
    }

    #[test]
    fn test_scan_args() {
        let cli = Cli::try_parse_from([
            "frontdesk", "scan", "a.jpg", "--name", "Alice", "-i", "visiting=Bob",
        ])
        .unwrap();
        match cli.command {
            Commands::Scan { name, info, .. } => {
                assert_eq!(name.as_deref(), Some("Alice"));
                assert_eq!(info, vec![("visiting".to_string(), "Bob".to_string())]);
            }
            _ => panic!("expected scan"),
        }
    }
}
