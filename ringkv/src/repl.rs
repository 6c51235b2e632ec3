// Client CLI (§6): R (read), W (write), E (exit). One round trip to the
// Coordinator per command; failures are printed, never panics.

use std::io::{self, BufRead, Write};

use ringkv_base::{err, Result};
use ringkv_node::Node;

pub fn run(node: &mut Node) -> Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush().ok();
        let command = match lines.next() {
            Some(Ok(line)) => line.trim().to_string(),
            _ => break,
        };
        match command.as_str() {
            "R" => {
                let key = prompt(&mut lines, "Key: ")?;
                match node.client_read(&key) {
                    Ok(Some(found)) => {
                        println!("Key: {}", found.key);
                        println!("Value: {}", found.value);
                        println!("TimeStamp: {}", found.timestamp);
                    }
                    Ok(None) => println!("Key was not found."),
                    Err(e) => println!("Read failed: {e}"),
                }
            }
            "W" => {
                let key = prompt(&mut lines, "Key: ")?;
                let value = prompt(&mut lines, "Value: ")?;
                match node.client_write(&key, &value) {
                    Ok(()) => println!("Wrote {key}."),
                    Err(e) => println!("Write failed: {e}"),
                }
            }
            "E" => break,
            other => println!("Unrecognized command {other:?}; expected R, W, or E."),
        }
    }
    Ok(())
}

fn prompt<I: Iterator<Item = io::Result<String>>>(lines: &mut I, label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush().ok();
    match lines.next() {
        Some(Ok(line)) => Ok(line.trim().to_string()),
        _ => Err(err("stdin closed while reading input")),
    }
}
