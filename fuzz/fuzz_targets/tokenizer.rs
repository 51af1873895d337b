#![no_main]

use libfuzzer_sys::fuzz_target;

use fluent_csv_machine::{Columns, TokenizerBuilder};

fuzz_target!(|data: &[u8]| {
    let mut tokenizer = TokenizerBuilder::with_capacity(16).from_reader(data);

    // Malformed input is fine, panicking is not
    for row in tokenizer.rows() {
        if row.is_err() {
            break;
        }
    }

    let mut tokenizer =
        TokenizerBuilder::with_capacity(16).from_reader_with_columns(data, Columns::select(&[1]));

    for row in tokenizer.rows() {
        if row.is_err() {
            break;
        }
    }
});
