#![no_main]

use libfuzzer_sys::fuzz_target;

use decoder::data::InstrumentMap;
use decoder::expander::ExpanderConfig;
use decoder::psx::{psx_dispatch_table, PsxFormat};
use decoder::songs::{decode_song, expand_song};
use decoder::{FormatDecoder, SongParams, SongTables};

// Expansion must terminate on any decodable input.
fuzz_target!(|data: &[u8]| {
    let dispatch = psx_dispatch_table();
    let instruments = InstrumentMap::default();
    let tables = SongTables {
        dispatch: &dispatch,
        instruments: &instruments,
        percussion: None,
    };
    let params = SongParams {
        song_id: 0,
        title: String::new(),
        use_alternate_pointers: false,
    };

    if let Ok(song) = decode_song(data, &FormatDecoder::Psx(PsxFormat), &params, &tables) {
        let config = ExpanderConfig {
            max_events: 10_000,
            ..ExpanderConfig::default()
        };
        let _ = expand_song(&song, &config);
    }
});
