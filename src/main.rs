use clap::{Parser, ValueEnum};
use log::LevelFilter;
use midi2imf::convert::ImfSongBuilder;
use midi2imf::engine::MidiEngine;
use midi2imf::file::{self, ImfFileType};
use midi2imf::instruments::InstrumentCatalog;
use std::path::PathBuf;

/// The instrument bank used when no `-b` option is given.
const DEFAULT_BANK: &str = "GENMIDI.OP2";

#[derive(Parser)]
#[command(
    name = "midi2imf",
    version,
    about = "Convert General MIDI or MUS music to id Software IMF (AdLib) files."
)]
struct Cli {
    /// Logging verbosity: 1=debug, 2=info, 3=warn, 4=error.
    #[arg(short = 'v', long = "verbosity", default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=4))]
    verbosity: u8,

    /// Instrument bank files (OP2 or WOPL3), later banks overriding earlier ones.
    /// Defaults to GENMIDI.OP2 in the working directory.
    #[arg(short = 'b', long = "bank")]
    banks: Vec<PathBuf>,

    /// Remap GM2-only drum notes onto nearby GM1 drums when the bank does not define them.
    #[arg(long = "gm2")]
    gm2: bool,

    /// Output file. Defaults to the input name with the filetype's extension.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Input song: a format 0/1 Standard MIDI File or a DMX MUS file.
    input: PathBuf,

    /// Output filetype.
    #[arg(value_enum, default_value_t = FileTypeArg::Imf1)]
    filetype: FileTypeArg,

    /// Song title, stored in the type 1 tag. Limited to 255 characters.
    #[arg(long)]
    title: Option<String>,

    /// Song composer, stored in the type 1 tag. Limited to 255 characters.
    #[arg(long)]
    composer: Option<String>,

    /// Remarks, stored in the type 1 tag. Limited to 255 characters.
    #[arg(long)]
    remarks: Option<String>,

    /// The program name stored in the type 1 tag, limited to 8 characters.
    #[arg(long)]
    program: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum FileTypeArg {
    /// IMF type 0 at 560 Hz (Commander Keen, Cosmo, Bio Menace).
    Imf0,
    /// IMF type 0 at 280 Hz (Duke Nukem II).
    Imf0dn2,
    /// IMF type 0 at 700 Hz (Wolfenstein 3-D).
    Imf0wlf,
    /// IMF type 1 at 700 Hz (Wolfenstein 3-D family).
    Imf1,
}

impl From<FileTypeArg> for ImfFileType {
    fn from(arg: FileTypeArg) -> Self {
        match arg {
            FileTypeArg::Imf0 => ImfFileType::Imf0,
            FileTypeArg::Imf0dn2 => ImfFileType::Imf0DukeNukem2,
            FileTypeArg::Imf0wlf => ImfFileType::Imf0Wolf,
            FileTypeArg::Imf1 => ImfFileType::Imf1,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbosity);
    if let Err(e) = run(cli) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        1 => LevelFilter::Debug,
        2 => LevelFilter::Info,
        3 => LevelFilter::Warn,
        _ => LevelFilter::Error,
    };
    env_logger::Builder::new().filter_level(level).init();
}

fn run(cli: Cli) -> midi2imf::Result<()> {
    let filetype = ImfFileType::from(cli.filetype);

    let mut catalog = InstrumentCatalog::new().with_gm2_drum_remap(cli.gm2);
    let banks = if cli.banks.is_empty() {
        vec![PathBuf::from(DEFAULT_BANK)]
    } else {
        cli.banks
    };
    for bank in &banks {
        catalog.add_bank_file(bank)?;
    }

    let song = file::load_song(&cli.input)?;
    let mut engine = MidiEngine::new(song);
    let mut builder = ImfSongBuilder::new(&catalog, filetype);
    engine.run(&mut builder);
    let mut adlib_song = builder.finish(&engine);
    adlib_song.set_tags(cli.title, cli.composer, cli.remarks, cli.program);

    let default_output = cli.input.with_extension(filetype.default_extension());
    let output = cli.output.unwrap_or(default_output);
    adlib_song.save(&output)
}
