#![no_main]

use libfuzzer_sys::fuzz_target;

use fluent_csv_machine::{ByteRecord, Tokenizer, WriterBuilder};

fuzz_target!(|data: &[u8]| {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    let record = data.split(|b| *b == b'|').collect::<ByteRecord>();

    writer.write_byte_record(&record).unwrap();

    let output = writer.into_inner().unwrap();
    let mut rows = Tokenizer::from_reader(output.as_slice()).into_rows();

    assert_eq!(rows.next().unwrap().unwrap(), record);
    assert!(rows.next().is_none());
});
