#![no_main]

use libfuzzer_sys::fuzz_target;

use decoder::data::InstrumentMap;
use decoder::psx::{psx_dispatch_table, PsxFormat};
use decoder::songs::decode_song;
use decoder::{FormatDecoder, SongParams, SongTables};

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
        use_alternate_pointers: data.len() % 2 == 0,
    };

    let _ = decode_song(data, &FormatDecoder::Psx(PsxFormat), &params, &tables);
});
