///! # CLI - FirkinKV Interactive Shell
///!
///! A REPL-style command-line interface for the FirkinKV storage engine.
///! Reads commands from stdin, executes them against the engine, and prints
///! results to stdout. Designed for both interactive use and scripted testing
///! (pipe commands via stdin).
///!
///! ## Commands
///!
///! ```text
///! SET key value      Insert or update a key-value pair
///! GET key            Look up a key (prints value or "(nil)")
///! DEL key            Delete a key (writes a tombstone)
///! KEYS               List all live keys
///! SCAN [prefix]      Ordered scan, optionally restricted to a key prefix
///! MERGE              Compact sealed data files
///! SYNC               fsync the active data file
///! STATS              Print engine counters
///! EXIT / QUIT        Shut down gracefully
///! ```
///!
///! ## Configuration
///!
///! All settings are controlled via environment variables:
///!
///! ```text
///! FIRKIN_DIR          Data directory              (default: "firkin-data")
///! FIRKIN_FILE_MB      Data file size in MiB       (default: 64)
///! FIRKIN_SYNC         fsync every write           (default: "false")
///! FIRKIN_INDEX        btree | art | bptree        (default: "btree")
///! FIRKIN_MERGE_RATIO  Merge trigger ratio         (default: 0.5)
///! ```

use std::io::{self, BufRead, Write};

use anyhow::Result;
use engine::{Config, Engine, EngineError, IndexKind, IteratorConfig};

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    let dir = env_or("FIRKIN_DIR", "firkin-data");
    let file_mb: u64 = env_or("FIRKIN_FILE_MB", "64").parse().unwrap_or(64);
    let sync_writes: bool = env_or("FIRKIN_SYNC", "false").parse().unwrap_or(false);
    let merge_ratio: f32 = env_or("FIRKIN_MERGE_RATIO", "0.5").parse().unwrap_or(0.5);
    let index_kind = match env_or("FIRKIN_INDEX", "btree").as_str() {
        "art" => IndexKind::Art,
        "bptree" => IndexKind::BPlusTree,
        _ => IndexKind::BTree,
    };

    let engine = Engine::open(Config {
        dir_path: dir.clone().into(),
        data_file_size: file_mb * 1024 * 1024,
        sync_writes,
        index_kind,
        merge_ratio,
        ..Config::default()
    })?;

    println!(
        "FirkinKV started (dir={}, file={}MiB, sync={}, index={:?}, merge_ratio={})",
        dir, file_mb, sync_writes, index_kind, merge_ratio
    );
    println!("Commands: SET key value | GET key | DEL key | KEYS | SCAN [prefix]");
    println!("          MERGE | SYNC | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "SET" => {
                    if let Some(k) = parts.next() {
                        let v: String = parts.collect::<Vec<&str>>().join(" ");
                        if v.is_empty() {
                            println!("ERR usage: SET key value");
                        } else {
                            match engine.put(k.as_bytes().to_vec(), v.into_bytes()) {
                                Ok(()) => println!("OK"),
                                Err(e) => println!("ERR set failed: {}", e),
                            }
                        }
                    } else {
                        println!("ERR usage: SET key value");
                    }
                }
                "GET" => {
                    if let Some(k) = parts.next() {
                        match engine.get(k.as_bytes()) {
                            Ok(v) => println!("{}", String::from_utf8_lossy(&v)),
                            Err(EngineError::KeyNotFound) => println!("(nil)"),
                            Err(e) => println!("ERR read failed: {}", e),
                        }
                    } else {
                        println!("ERR usage: GET key");
                    }
                }
                "DEL" => {
                    if let Some(k) = parts.next() {
                        match engine.delete(k.as_bytes().to_vec()) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR del failed: {}", e),
                        }
                    } else {
                        println!("ERR usage: DEL key");
                    }
                }
                "KEYS" => match engine.list_keys() {
                    Ok(keys) => {
                        for key in &keys {
                            println!("{}", String::from_utf8_lossy(key));
                        }
                        println!("({} keys)", keys.len());
                    }
                    Err(e) => println!("ERR keys failed: {}", e),
                },
                "SCAN" => {
                    let prefix = parts.next().unwrap_or("").as_bytes().to_vec();
                    match engine.iterator(IteratorConfig {
                        reverse: false,
                        prefix,
                    }) {
                        Ok(mut iter) => {
                            let mut count = 0usize;
                            while iter.valid() {
                                match iter.value() {
                                    Ok(v) => println!(
                                        "{} -> {}",
                                        String::from_utf8_lossy(iter.key()),
                                        String::from_utf8_lossy(&v)
                                    ),
                                    Err(e) => println!("ERR scan read failed: {}", e),
                                }
                                count += 1;
                                iter.next();
                            }
                            if count == 0 {
                                println!("(empty)");
                            } else {
                                println!("({} entries)", count);
                            }
                        }
                        Err(e) => println!("ERR scan failed: {}", e),
                    }
                }
                "MERGE" => match engine.merge() {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR merge failed: {}", e),
                },
                "SYNC" => match engine.sync() {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR sync failed: {}", e),
                },
                "STATS" => match engine.stats() {
                    Ok(stats) => println!(
                        "keys={} files={} reclaimable={}B disk={}B",
                        stats.key_count,
                        stats.data_file_count,
                        stats.reclaimable_bytes,
                        stats.disk_size
                    ),
                    Err(e) => println!("ERR stats failed: {}", e),
                },
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => {
                    println!("ERR unknown command: {}", other);
                }
            }
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    engine.close()?;
    Ok(())
}
