//! face_enroll - enroll a known face from a reference photo
//!
//! Extracts the first face embedding from the photo and writes it to the
//! gallery as `<label>.json`. Run once per person; the daemon picks the
//! gallery up on its next start.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use door_sentinel::recognize;

#[derive(Parser, Debug)]
#[command(name = "face_enroll", about = "Enroll a known face for recognition")]
struct Args {
    /// Reference photo containing exactly one face (jpg or png)
    image: PathBuf,

    /// Name of the person in the photo
    label: String,

    /// Gallery directory holding enrolled embeddings
    #[arg(long, default_value = "known_faces")]
    faces_dir: PathBuf,

    /// ONNX face-embedding model (requires the embed-tract feature)
    #[arg(long)]
    embedding_model: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let embedder = recognize::default_embedder(args.embedding_model.as_deref());
    let path = recognize::enroll(embedder.as_ref(), &args.image, &args.label, &args.faces_dir)?;

    println!("enrolled {} -> {}", args.label, path.display());
    println!("restart sentineld to pick up the new face");
    Ok(())
}
