//! MPX CLI - run pipeline nodes against the generation backend

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{auth, generate, nodes, pipeline, status, Session};
use mpx_client::MpxConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mpx")]
#[command(about = "Text, image and 3D generation nodes for game asset pipelines", long_about = None)]
#[command(version)]
struct Cli {
    /// Use the scripted offline backend instead of the network
    #[arg(long, global = true)]
    mock: bool,

    /// Directory for generated files (default: output)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Worker threads for list operations (default from config)
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the available nodes
    Nodes {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Run a node with JSON input
    Run {
        /// Node name (see `mpx nodes`)
        name: String,

        /// Input as JSON, or @path to read it from a file
        #[arg(long, short, default_value = "{}")]
        input: String,
    },

    /// Generate images from a prompt
    Image {
        prompt: String,

        /// Number of images (1-4)
        #[arg(long, short = 'n', default_value = "1")]
        count: u32,

        #[arg(long, default_value = "1")]
        seed: u64,

        /// Do not add the full-view 3D instructions
        #[arg(long)]
        no_3d: bool,

        /// Allow more than one object per image
        #[arg(long)]
        multi: bool,
    },

    /// Pick the best of several images
    Pick {
        /// Image files (1-4)
        #[arg(required = true)]
        images: Vec<PathBuf>,

        #[arg(long, default_value = "")]
        conditions: String,

        /// What the images are meant to show
        #[arg(long, default_value = "")]
        info: String,

        #[arg(long, default_value = "")]
        style: String,

        #[arg(long)]
        used_for_3d: bool,

        #[arg(long)]
        one_object: bool,
    },

    /// Turn images (paths or URLs) into 3D models
    To3d {
        #[arg(required = true)]
        images: Vec<String>,

        /// Texture resolution (512, 1024 or 2048)
        #[arg(long, default_value = "1024")]
        texture_size: u32,

        #[arg(long, default_value = "1")]
        seed: u64,

        /// Also download the GLB files
        #[arg(long)]
        save: bool,
    },

    /// Reduce the polygon count of a model
    Optimize {
        /// Model URL, or a request id with --request-id
        mesh: String,

        /// Treat MESH as a backend request id
        #[arg(long)]
        request_id: bool,

        /// Fraction of polygons to keep
        #[arg(long, default_value = "0.85")]
        ratio: f64,

        #[arg(long, default_value = "glb")]
        format: String,

        #[arg(long, default_value = "object")]
        object_type: String,
    },

    /// Theme to objects to images to 3D models
    Pipeline {
        theme: String,

        #[arg(long, default_value = "1")]
        min: u32,

        #[arg(long, default_value = "4")]
        max: u32,

        /// Check images and regenerate the ones that fail
        #[arg(long)]
        reflect: bool,

        /// Extra directions the images must follow when reflecting
        #[arg(long, default_value = "")]
        directions: String,

        #[arg(long, default_value = "1")]
        seed: u64,

        #[arg(long, default_value = "1024")]
        texture_size: u32,

        /// Stop after generating images
        #[arg(long)]
        skip_3d: bool,
    },

    /// Show the status of a backend request
    Status { request_id: String },

    /// Validate and store an API key
    Auth { key: String },
}

fn init_logging(config: &MpxConfig) {
    let filter = EnvFilter::try_from_env("MPX_LOG")
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = MpxConfig::load()?;
    init_logging(&config);

    let open = || Session::open(&config, cli.mock, cli.output_dir.clone(), cli.workers);
    match cli.command {
        Commands::Nodes { format } => nodes::list(&format),
        Commands::Auth { key } => auth::run(&key, &config, cli.mock),
        Commands::Status { request_id } => status::run(&open()?, &request_id),
        Commands::Run { name, input } => nodes::run(&open()?, &name, &input),
        Commands::Image {
            prompt,
            count,
            seed,
            no_3d,
            multi,
        } => generate::image(&open()?, generate::ImageArgs {
            prompt,
            count,
            seed,
            used_for_3d: !no_3d,
            single_object: !multi,
        }),
        Commands::Pick {
            images,
            conditions,
            info,
            style,
            used_for_3d,
            one_object,
        } => generate::pick(&open()?, generate::PickArgs {
            images,
            conditions,
            info,
            style,
            used_for_3d,
            one_object,
        }),
        Commands::To3d {
            images,
            texture_size,
            seed,
            save,
        } => generate::to_3d(&open()?, &images, texture_size, seed, save),
        Commands::Optimize {
            mesh,
            request_id,
            ratio,
            format,
            object_type,
        } => generate::optimize(&open()?, &mesh, request_id, ratio, &format, &object_type),
        Commands::Pipeline {
            theme,
            min,
            max,
            reflect,
            directions,
            seed,
            texture_size,
            skip_3d,
        } => pipeline::run(&open()?, pipeline::PipelineArgs {
            theme,
            min,
            max,
            reflect,
            directions,
            seed,
            texture_size,
            skip_3d,
        }),
    }
}
