use clap::{ArgGroup, Parser};
use splat_lib::common::{GZIP_DEFAULT_COMPRESSION_LVL, GZIP_MAX_COMPRESSION_LVL};
use splat_lib::gzip::decompress_gzip;
use splat_lib::{compress_async, compress_ply, decompress_async, decompress_to_ply, read_header};
use splat_lib::SplatError;
use std::cmp::min;
use std::error::Error;
use std::fs;
use std::process;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "Splat PLY/SPZ Converter",
    version = "1.0",
    author = "Denis Avvakumov",
    about = "Converts Gaussian splat PLY captures to SPZ and back"
)]
#[command(group(
    ArgGroup::new("mode").required(true).args(&["compress", "decompress", "info"])
))]
struct Cli {
    #[arg(short = 'e', long = "compress", help = "Convert a PLY capture into SPZ.")]
    compress: bool,

    #[arg(short = 'd', long = "decompress", help = "Convert an SPZ file back into PLY.")]
    decompress: bool,

    #[arg(long = "info", help = "Print the SPZ header of the input and exit.")]
    info: bool,

    #[arg(
        short = 'n',
        long = "normals",
        default_value = "false",
        help = "Write zero normals into the output PLY (decompression only)."
    )]
    include_normals: bool,

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
        required_unless_present = "info",
        help = "Path to the output file."
    )]
    output: Option<String>,

    #[arg(
        short = 'c',
        long = "compression-level",
        value_name = "LEVEL",
        default_value_t = GZIP_DEFAULT_COMPRESSION_LVL,
        help = "Gzip compression level (0-9)."
    )]
    compression_level: u32,

    #[arg(
        short = 'a',
        long = "async",
        default_value = "false",
        help = "Run the gzip stage on the tokio runtime."
    )]
    async_mode: bool,
}

fn exit_with(context: &str, err: SplatError) -> ! {
    tracing::error!("{}: {}", context, err);
    process::exit(if err.is_invalid_data() { 2 } else { 1 });
}

fn print_info(path: &str, data: &[u8]) {
    let raw = decompress_gzip(data).unwrap_or_else(|e| exit_with("Reading SPZ stream", e));
    let hdr = read_header(&raw).unwrap_or_else(|e| exit_with("Reading SPZ header", e));
    println!("File: {} ({} bytes, {} inflated)", path, data.len(), raw.len());
    println!("Version: {}", hdr.version.get());
    println!("Points: {}", hdr.num_points.get());
    println!("SH degree: {}", hdr.sh_degree);
    println!("Fractional bits: {}", hdr.fractional_bits);
    println!("Antialiased: {}", hdr.antialiased());
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.include_normals && !cli.decompress {
        tracing::error!("--normals (-n) can only be used with decompression (-d).");
        process::exit(1);
    }

    let raw_data = fs::read(&cli.input).unwrap_or_else(|e| {
        tracing::error!("Error reading input file {}: {}", cli.input, e);
        process::exit(1);
    });

    if cli.info {
        print_info(&cli.input, &raw_data);
        return Ok(());
    }
    let Some(output) = cli.output.as_deref() else {
        tracing::error!("--output (-o) is required for conversion.");
        process::exit(1);
    };

    let mode = if cli.async_mode { "Asynchronous" } else { "Synchronous" };
    let op = if cli.compress { "Compression" } else { "Decompression" };
    let cmp_level = min(cli.compression_level, GZIP_MAX_COMPRESSION_LVL);

    if cli.compress {
        tracing::info!(
            "Mode: {} {} | Input: {} | Output: {} | Level: {}",
            mode,
            op,
            cli.input,
            output,
            cmp_level
        );
    } else {
        tracing::info!(
            "Mode: {} {} | Input: {} | Output: {} | {} normals",
            mode,
            op,
            cli.input,
            output,
            if cli.include_normals { "Including" } else { "Excluding" }
        );
    }

    let start = Instant::now();

    let result: Result<Vec<u8>, SplatError> = if cli.async_mode {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        rt.block_on(async {
            let mut buf = Vec::new();
            if cli.compress {
                compress_async(&raw_data, cmp_level, &mut buf).await?;
            } else {
                decompress_async(&raw_data, cli.include_normals, &mut buf).await?;
            }
            Ok(buf)
        })
    } else {
        let mut buf = Vec::new();
        let res = if cli.compress {
            compress_ply(&raw_data, cmp_level, &mut buf)
        } else {
            decompress_to_ply(&raw_data, cli.include_normals, &mut buf)
        };
        res.map(|_| buf)
    };
    let result = result.unwrap_or_else(|e| exit_with(op, e));

    tracing::info!(
        "{} time: {} ms ({} -> {} bytes)",
        op,
        start.elapsed().as_millis(),
        raw_data.len(),
        result.len()
    );

    fs::write(output, &result).unwrap_or_else(|e| {
        tracing::error!("Error writing output '{}': {}", output, e);
        process::exit(1);
    });
    tracing::info!("Successfully wrote to '{}'.", output);

    Ok(())
}
