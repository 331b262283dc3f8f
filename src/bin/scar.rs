use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use scar::compression::Codec;
use scar::{reader, writer};

/// scar
#[derive(Debug, Parser)]
#[clap(name = "scar", version, about = "Seekable compressed tar archives")]
struct App {
    /// Input file ('-' for stdin)
    #[clap(short = 'i', long = "in", value_name = "PATH", global = true)]
    input: Option<PathBuf>,

    /// Output file ('-' for stdout)
    #[clap(short = 'o', long = "out", value_name = "PATH", global = true)]
    output: Option<PathBuf>,

    /// Approximate compressed distance between seek points
    #[clap(
        short,
        long,
        value_name = "N",
        default_value_t = writer::DEFAULT_BLOCKSIZE,
        global = true
    )]
    blocksize: u64,

    /// Compression algorithm; 'auto' guesses from the output file name
    #[clap(short, long, value_enum, default_value = "auto", global = true)]
    compression: Compression,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Compression {
    Auto,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Turn a tar stream from the input into a seekable archive
    Create,
    /// Write the named members to the output, concatenated
    Cat {
        #[clap(required = true, value_name = "PATH")]
        paths: Vec<String>,
    },
    /// List member paths, one per line
    List,
    /// Write a tar stream of members matching the patterns (reserved)
    Subset {
        #[clap(required = true, value_name = "PATTERN")]
        patterns: Vec<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = App::parse();

    match args.cmd {
        Command::Create => {
            let codec = resolve_codec(args.compression, args.output.as_deref())?;
            let src = open_input(&args.input)?;
            let out = open_output(&args.output)?;
            writer::create(BufReader::new(src), out, codec, args.blocksize)?;
        }
        Command::Cat { paths } => {
            let mut archive = open_archive(&args.input)?;
            let mut out = open_output(&args.output)?;
            reader::cat(&mut archive, &mut out, &paths)?;
        }
        Command::List => {
            let mut archive = open_archive(&args.input)?;
            let mut out = open_output(&args.output)?;
            reader::list(&mut archive, &mut out)?;
        }
        Command::Subset { .. } => {
            bail!("subcommand not implemented: subset");
        }
    }
    Ok(())
}

fn resolve_codec(arg: Compression, output: Option<&Path>) -> Result<Codec> {
    Ok(match arg {
        Compression::Gzip => Codec::Gzip,
        Compression::Bzip2 => Codec::Bzip2,
        Compression::Xz => Codec::Xz,
        Compression::Zstd => Codec::Zstd,
        Compression::Auto => match output {
            // stdout has no suffix to go by
            None => Codec::Gzip,
            Some(p) if p.as_os_str() == "-" => Codec::Gzip,
            Some(p) => Codec::for_path(p).with_context(|| {
                format!(
                    "couldn't guess compression from file name {}; use --compression",
                    p.display()
                )
            })?,
        },
    })
}

fn open_input(path: &Option<PathBuf>) -> Result<Box<dyn Read>> {
    match path {
        Some(p) if p.as_os_str() != "-" => {
            let file = File::open(p).with_context(|| p.display().to_string())?;
            Ok(Box::new(file))
        }
        _ => Ok(Box::new(io::stdin())),
    }
}

fn open_output(path: &Option<PathBuf>) -> Result<Box<dyn Write>> {
    match path {
        Some(p) if p.as_os_str() != "-" => {
            let file = File::create(p).with_context(|| p.display().to_string())?;
            Ok(Box::new(file))
        }
        _ => Ok(Box::new(io::stdout())),
    }
}

/// Reading an archive means seeking in it; stdin won't do.
fn open_archive(path: &Option<PathBuf>) -> Result<File> {
    match path {
        Some(p) if p.as_os_str() != "-" => File::open(p).with_context(|| p.display().to_string()),
        _ => bail!("reading an archive requires a seekable file; use --in"),
    }
}
