//! sequence ripper binary

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use clap::{Args, Parser, Subcommand, ValueEnum};
use decoder::data::{self, DispatchTable, InstrumentMap, PercussionMap};
use decoder::expander::{ExpanderConfig, VolumeFadePolicy};
use decoder::ir::Song;
use decoder::psx::{psx_dispatch_table, PsxFormat};
use decoder::snes::{SnesFormat, SnesVariant};
use decoder::songs;
use decoder::source::SourceCache;
use decoder::{FormatDecoder, SongParams, SongTables};

use std::fs;
use std::path::PathBuf;

macro_rules! error {
    ($($arg:tt)*) => {{
        eprintln!($($arg)*);
        std::process::exit(1);
    }};
}

#[derive(Parser)]
#[command(author, version)]
#[command(about = "retro sequence decoder")]
#[command(arg_required_else_help = true)]
struct ArgParser {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Disassemble a song's tracks
    Disasm(SongArgs),
    /// Decode a song and dump the IR as JSON
    Ir(SongArgs),
    /// Decode and expand a song into timed events (JSON)
    Events(EventsArgs),
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Format {
    Psx,
    SnesRev1,
    SnesRev2,
    SnesRev3,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum FadePolicy {
    Discrete,
    StateRamp,
}

#[derive(Args)]
struct SongArgs {
    #[arg(value_name = "IMAGE", help = "disc/ROM image file")]
    image: PathBuf,

    #[arg(short, long, value_enum, help = "sequence format")]
    format: Format,

    #[arg(long, value_name = "OFFSET", value_parser = parse_number,
          help = "song byte offset in the image (hex with 0x prefix)")]
    offset: u64,

    #[arg(long, value_name = "LENGTH", value_parser = parse_number,
          help = "song byte length")]
    length: u64,

    #[arg(long, value_name = "ID", default_value = "0", help = "song id")]
    song_id: u32,

    #[arg(long, value_name = "TITLE", default_value = "", help = "song title")]
    title: String,

    #[arg(long, help = "use the alternate track-pointer table (PSX)")]
    alternate_pointers: bool,

    #[arg(long, value_name = "JSON_FILE", help = "dispatch table override")]
    dispatch: Option<PathBuf>,

    #[arg(long, value_name = "JSON_FILE", help = "instrument table")]
    instruments: Option<PathBuf>,

    #[arg(long, value_name = "JSON_FILE", help = "percussion table")]
    percussion: Option<PathBuf>,

    #[arg(short = 'o', long, value_name = "FILE", help = "output file (default stdout)")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct EventsArgs {
    #[command(flatten)]
    song: SongArgs,

    #[arg(long, value_enum, default_value = "discrete", help = "volume fade rendering")]
    fade_policy: FadePolicy,

    #[arg(long, value_name = "N", help = "event-count ceiling")]
    max_events: Option<usize>,

    #[arg(long, value_name = "TICKS", help = "note gate in native ticks")]
    gate: Option<u32>,
}

fn main() {
    env_logger::init();

    let args = ArgParser::parse();

    match args.command {
        Command::Disasm(a) => disasm_song(a),
        Command::Ir(a) => dump_ir(a),
        Command::Events(a) => dump_events(a),
    }
}

// Commands
// ========

fn disasm_song(args: SongArgs) {
    let song = decode(&args);

    let mut out = String::new();
    for track in song.tracks.values() {
        out.push_str(&format!("; track {} at {:#06x}\n", track.number, track.start_offset));
        for line in &track.disassembly {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }

    write_output(args.output, out);
}

fn dump_ir(args: SongArgs) {
    let song = decode(&args);

    match serde_json::to_string_pretty(&song) {
        Ok(json) => write_output(args.output, json),
        Err(e) => error!("Cannot serialize song: {}", e),
    }
}

fn dump_events(args: EventsArgs) {
    let song = decode(&args.song);

    let mut config = ExpanderConfig {
        fade_policy: match args.fade_policy {
            FadePolicy::Discrete => VolumeFadePolicy::DiscreteEvents,
            FadePolicy::StateRamp => VolumeFadePolicy::StateRamp,
        },
        ..ExpanderConfig::default()
    };
    if let Some(n) = args.max_events {
        config.max_events = n;
    }
    if let Some(g) = args.gate {
        config.gate_ticks = g;
    }

    let expansion = songs::expand_song(&song, &config);

    match serde_json::to_string_pretty(&expansion) {
        Ok(json) => write_output(args.song.output, json),
        Err(e) => error!("Cannot serialize events: {}", e),
    }
}

// Song loading
// ============

fn decode(args: &SongArgs) -> Song {
    let decoder = match args.format {
        Format::Psx => FormatDecoder::Psx(PsxFormat),
        Format::SnesRev1 => FormatDecoder::Snes(SnesFormat::new(SnesVariant::rev1())),
        Format::SnesRev2 => FormatDecoder::Snes(SnesFormat::new(SnesVariant::rev2())),
        Format::SnesRev3 => FormatDecoder::Snes(SnesFormat::new(SnesVariant::rev3())),
    };

    let dispatch = match &args.dispatch {
        Some(path) => load_dispatch(path),
        None => match &decoder {
            FormatDecoder::Psx(_) => psx_dispatch_table(),
            FormatDecoder::Snes(f) => f.variant.dispatch_table(),
        },
    };

    let instruments = match &args.instruments {
        Some(path) => match data::load_instrument_file(path) {
            Ok(i) => i,
            Err(e) => error!("{}", e),
        },
        None => InstrumentMap::default(),
    };

    let percussion: Option<PercussionMap> = match &args.percussion {
        Some(path) => match data::load_percussion_file(path) {
            Ok(p) => Some(p),
            Err(e) => error!("{}", e),
        },
        None => None,
    };

    let tables = SongTables {
        dispatch: &dispatch,
        instruments: &instruments,
        percussion: percussion.as_ref(),
    };

    let params = SongParams {
        song_id: args.song_id,
        title: args.title.clone(),
        use_alternate_pointers: args.alternate_pointers,
    };

    let mut cache = SourceCache::new();
    let source = match cache.open(&args.image) {
        Ok(s) => s,
        Err(e) => error!("{}", e),
    };

    let length = match usize::try_from(args.length) {
        Ok(l) if l > 0 => l,
        _ => error!("Invalid song length: {}", args.length),
    };

    match songs::decode_song_from_source(&source, args.offset, length, &decoder, &params, &tables) {
        Ok(song) => song,
        Err(e) => error!("Cannot decode song: {}", e),
    }
}

fn load_dispatch(path: &PathBuf) -> DispatchTable {
    match data::load_dispatch_file(path) {
        Ok(t) => t,
        Err(e) => error!("{}", e),
    }
}

fn parse_number(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };

    parsed.map_err(|_| format!("invalid number: {}", s))
}

fn write_output(path: Option<PathBuf>, contents: String) {
    match path {
        Some(path) => match fs::write(&path, contents) {
            Ok(()) => (),
            Err(why) => error!("Error writing {}: {}", path.display(), why),
        },
        None => println!("{}", contents),
    }
}
