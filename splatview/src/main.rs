use clap::{ArgGroup, Parser};
use splatview_lib::{pack, pack_async, unpack, unpack_async, PackOptions};
use splatview_lib::{
    BillboardExpander, BlendMode, Compositor, DepthSort, RenderConfig, SceneLoader,
    SoftwareDevice, SplatSet, Topology,
};
use std::error::Error;
use std::fs;
use std::path::Path;
use std::process;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "Splat Viewer",
    version = "1.0",
    author = "Denis Avvakumov",
    about = "Renders .splat point clouds to PNG and packs them with zstd"
)]
#[command(group(
    ArgGroup::new("mode").required(true).args(&["render", "compress", "decompress"])
))]
struct Cli {
    #[arg(short = 'r', long = "render", help = "Render the input to a PNG image.")]
    render: bool,

    #[arg(short = 'e', long = "compress", help = "Pack the input into a zstd archive.")]
    compress: bool,

    #[arg(short = 'd', long = "decompress", help = "Unpack a zstd archive to a .splat file.")]
    decompress: bool,

    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the input file."
    )]
    input: String,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "OUTPUT",
        required = true,
        help = "Path to the output file."
    )]
    output: String,

    #[arg(
        long = "config",
        value_name = "CONFIG",
        help = "TOML render configuration (only valid with rendering)."
    )]
    config: Option<String>,

    #[arg(
        long = "width",
        value_name = "WIDTH",
        default_value = "800",
        help = "Image width."
    )]
    width: u32,

    #[arg(
        long = "height",
        value_name = "HEIGHT",
        default_value = "600",
        help = "Image height."
    )]
    height: u32,

    #[arg(
        short = 't',
        long = "topology",
        value_name = "TOPOLOGY",
        help = "Primitive topology: point or quad."
    )]
    topology: Option<Topology>,

    #[arg(
        short = 'b',
        long = "blend",
        value_name = "BLEND",
        help = "Color blend mode: premultiplied or straight."
    )]
    blend: Option<BlendMode>,

    #[arg(long = "fov", value_name = "DEGREES", help = "Vertical field of view.")]
    fov: Option<f32>,

    #[arg(
        short = 's',
        long = "scaling-factor",
        value_name = "FACTOR",
        help = "Splat scaling factor applied at draw time."
    )]
    scaling_factor: Option<f32>,

    #[arg(
        long = "flip-y",
        default_value = "false",
        help = "Mirror the scene vertically."
    )]
    flip_y: bool,

    #[arg(
        short = 'c',
        long = "compression-level",
        value_name = "LEVEL",
        default_value = "3",
        help = "Set the compression level (capped at 22)."
    )]
    compression_level: u32,

    #[arg(
        short = 'w',
        long = "workers",
        value_name = "WORKERS",
        default_value = "3",
        help = "Set the workers count for ZSTD."
    )]
    workers: u32,

    #[arg(
        short = 'a',
        long = "async",
        default_value = "false",
        help = "Enable asynchronous loading and compression."
    )]
    async_mode: bool,
}

impl Cli {
    fn render_config(&self) -> Result<RenderConfig, Box<dyn Error + Send + Sync>> {
        let mut config = match &self.config {
            Some(path) => RenderConfig::from_file(path)?,
            None => RenderConfig::default(),
        };
        if let Some(topology) = self.topology {
            config.topology = topology;
        }
        if let Some(blend) = self.blend {
            config.blend = blend;
        }
        if let Some(fov) = self.fov {
            config.camera.fov_y_degrees = fov;
        }
        if let Some(scaling_factor) = self.scaling_factor {
            config.scaling_factor = scaling_factor;
        }
        if self.flip_y {
            config.camera.flip_y = true;
        }
        config.validate()?;
        Ok(config)
    }
}

fn is_archive(path: &str) -> bool {
    Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zst"))
}

fn render(
    mut set: SplatSet,
    config: &RenderConfig,
    width: u32,
    height: u32,
    output: &str,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    splatview_lib::sort_by_depth(&mut set, &DepthSort::from_config(config));
    let buffers = BillboardExpander::from_config(config).expand(&set);
    drop(set);

    let mut compositor = Compositor::new(SoftwareDevice::new(width, height), config)?;
    compositor.upload(&buffers)?;
    drop(buffers);
    compositor.draw()?;

    info!(fragments = compositor.device().fragments(), "Frame rasterized");
    compositor.device().save_png(output)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let has_render_options = cli.config.is_some()
        || cli.topology.is_some()
        || cli.blend.is_some()
        || cli.fov.is_some()
        || cli.scaling_factor.is_some()
        || cli.flip_y;
    if has_render_options && !cli.render {
        eprintln!("Error: render options can only be used with rendering (-r).");
        process::exit(1);
    }

    let mode = if cli.async_mode {
        "Asynchronous"
    } else {
        "Synchronous"
    };
    let op = if cli.render {
        "Rendering"
    } else if cli.compress {
        "Compression"
    } else {
        "Decompression"
    };

    // Print the header info.
    print!(
        "Mode: {} {}\nInput: {} | Output: {}",
        mode, op, cli.input, cli.output
    );
    if cli.render {
        println!(" | Size: {}x{}", cli.width, cli.height);
    } else if cli.compress {
        println!(" | Level: {}", cli.compression_level);
    } else {
        println!();
    }

    let options = PackOptions {
        level: cli.compression_level,
        workers: cli.workers,
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let start = Instant::now();

    if cli.render {
        let config = cli.render_config().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            process::exit(1);
        });
        let loader = SceneLoader::new();
        let set = if is_archive(&cli.input) {
            // archives are unpacked here, the loader only sees records
            let ticket = loader.begin();
            let packed = fs::read(&cli.input)?;
            let raw = if cli.async_mode {
                rt.block_on(unpack_async(&packed))?
            } else {
                unpack(&packed)?
            };
            loader.finish(&ticket, &raw)?
        } else if cli.async_mode {
            rt.block_on(loader.load_path_async(&cli.input))?
        } else {
            loader.load_path(&cli.input)?
        };
        println!("Splats: {}", set.len());
        render(set, &config, cli.width, cli.height, &cli.output)?;

        let elapsed = start.elapsed().as_millis();
        println!("{} Time: {} ms", op, elapsed);
        println!("Successfully wrote to '{}'.", cli.output);
        return Ok(());
    }

    let raw_data = fs::read(&cli.input).unwrap_or_else(|e| {
        eprintln!("Error reading input file {}: {}", cli.input, e);
        process::exit(1);
    });

    let result = match (cli.compress, cli.async_mode) {
        (true, true) => rt.block_on(pack_async(&raw_data, options))?,
        (true, false) => pack(&raw_data, options)?,
        (false, true) => rt.block_on(unpack_async(&raw_data))?,
        (false, false) => unpack(&raw_data)?,
    };

    let elapsed = start.elapsed().as_millis();
    println!("{} Time: {} ms", op, elapsed);

    fs::write(&cli.output, &result).unwrap_or_else(|e| {
        eprintln!("Error writing output '{}': {}", cli.output, e);
        process::exit(1);
    });
    println!("Successfully wrote to '{}'.", cli.output);

    Ok(())
}
