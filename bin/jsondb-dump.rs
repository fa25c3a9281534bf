//! `dump <db-path> <out.ndjson> [incDel]` writes every live object (or
//! every object including tombstones) as newline-delimited JSON.
//! `load <db-path> <in.ndjson>` replays a dump back transactionally.
//! Exit 0 on success, non-zero on I/O or validation error.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::process::ExitCode;

use jsondb::core::config::Config;
use jsondb::Database;

const ADMIN: &str = "*";

fn usage() -> ! {
    eprintln!("usage: jsondb-dump dump <db-path> <out.ndjson> [incDel]");
    eprintln!("       jsondb-dump load <db-path> <in.ndjson>");
    std::process::exit(2);
}

fn run() -> Result<(), String> {
    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| usage());
    let db_path = args.next().unwrap_or_else(|| usage());
    let file_path = args.next().unwrap_or_else(|| usage());

    let config = Config { storage_path: db_path.into(), ..Config::default() };
    let db = Database::open(config).map_err(|e| e.to_string())?;

    match command.as_str() {
        "dump" => {
            let include_deleted = args.next().as_deref() == Some("incDel");
            let mut out = BufWriter::new(File::create(&file_path).map_err(|e| e.to_string())?);
            let written = db.dump(ADMIN, include_deleted, &mut out).map_err(|e| e.to_string())?;
            log::info!("dumped {written} objects to {file_path}");
            Ok(())
        }
        "load" => {
            let mut input = BufReader::new(File::open(&file_path).map_err(|e| e.to_string())?);
            let loaded = db.load(ADMIN, &mut input).map_err(|e| e.to_string())?;
            log::info!("loaded {loaded} objects from {file_path}");
            Ok(())
        }
        other => {
            eprintln!("unknown command: {other}");
            usage();
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
