use std::fs::File;

use anyhow::Result;
use clap::Parser;
use csv::{ByteRecord, ReaderBuilder};
use fluent_csv_machine::{Columns, WorkflowBuilder};

#[derive(Parser, Debug)]
struct Args {
    /// Path to target CSV file
    path: String,

    /// Whether to count using the `csv` crate instead
    #[arg(long)]
    reference: bool,

    /// Only decode those columns, fast-forwarding over the other ones
    #[arg(long, value_delimiter = ',')]
    select: Option<Vec<usize>>,

    /// Capacity of the queue between the tokenizer and the counter
    #[arg(long, default_value_t = 1000)]
    queue_capacity: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let delimiter = if args.path.ends_with(".tsv") {
        b'\t'
    } else {
        b','
    };

    if args.reference {
        let mut reader_builder = ReaderBuilder::new();
        reader_builder.has_headers(false).delimiter(delimiter);
        let mut reader = reader_builder.from_path(&args.path)?;

        let mut count: u64 = 0;
        let mut record = ByteRecord::new();

        while reader.read_byte_record(&mut record)? {
            count += 1;
        }

        println!("{}", count);
    } else {
        let columns = match &args.select {
            Some(positions) => Columns::select(positions),
            None => Columns::raw(),
        };

        let lengths = WorkflowBuilder::new()
            .delimiter(delimiter)
            .queue_capacity(args.queue_capacity)
            .buffer_capacity(1024 * (1 << 10))
            .strip_bom(true)
            .run_with_columns(File::open(&args.path)?, columns, |record| Ok(record.len()))?;

        println!("{}", lengths.len());
    }

    Ok(())
}
