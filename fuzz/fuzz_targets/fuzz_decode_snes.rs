#![no_main]

use libfuzzer_sys::fuzz_target;

use decoder::data::InstrumentMap;
use decoder::snes::{SnesFormat, SnesVariant};
use decoder::songs::decode_song;
use decoder::{FormatDecoder, SongParams, SongTables};

fuzz_target!(|data: &[u8]| {
    let variant = match data.len() % 3 {
        0 => SnesVariant::rev1(),
        1 => SnesVariant::rev2(),
        _ => SnesVariant::rev3(),
    };
    let dispatch = variant.dispatch_table();

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

    let _ = decode_song(
        data,
        &FormatDecoder::Snes(SnesFormat::new(variant)),
        &params,
        &tables,
    );
});
