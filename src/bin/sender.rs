//! `rdt-sender <remote_ip> <remote_port> <input_file> [window_size]`
//!
//! Thin CLI wrapper over [`rdt::Endpoint::send`], grounded on
//! `lab2/src/sender.cpp` for argument order and the statistics it
//! prints at the end.

use std::fs::File;
use std::io::Read;
use std::net::IpAddr;
use std::process::ExitCode;
use std::time::Instant;

use rdt::{Endpoint, EndpointConfig};

const READ_CHUNK: usize = 16 * 1024;

fn print_usage(program_name: &str) {
    eprintln!("Usage: {program_name} <remote_ip> <remote_port> <input_file> [window_size]");
    eprintln!("  remote_ip: remote server IP address");
    eprintln!("  remote_port: remote server port number");
    eprintln!("  input_file: file to send");
    eprintln!("  window_size: receive window size in segments (optional, default 32)");
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{} KB", bytes / KB)
    } else if bytes < GB {
        format!("{} MB", bytes / MB)
    } else {
        format!("{} GB", bytes / GB)
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        print_usage(&args[0]);
        return ExitCode::FAILURE;
    }

    let remote_ip: IpAddr = match args[1].parse() {
        Ok(ip) => ip,
        Err(err) => {
            eprintln!("error: invalid remote_ip {:?}: {}", args[1], err);
            return ExitCode::FAILURE;
        }
    };
    let remote_port: u16 = match args[2].parse() {
        Ok(port) => port,
        Err(err) => {
            eprintln!("error: invalid remote_port {:?}: {}", args[2], err);
            return ExitCode::FAILURE;
        }
    };
    let input_file = &args[3];
    let window_size: usize = match args.get(4).map(|s| s.parse()) {
        Some(Ok(n)) => n,
        Some(Err(err)) => {
            eprintln!("error: invalid window_size {:?}: {}", args[4], err);
            return ExitCode::FAILURE;
        }
        None => EndpointConfig::default().window_size,
    };

    println!("=== RDT Protocol - Sender ===");
    println!("Remote: {remote_ip}:{remote_port}");
    println!("Input File: {input_file}");
    println!("Window Size: {window_size}");
    println!();

    let mut file = match File::open(input_file) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("error: cannot open file {input_file:?}: {err}");
            return ExitCode::FAILURE;
        }
    };
    let file_size = file.metadata().map(|m| m.len()).unwrap_or(0);
    println!("File Size: {} ({} bytes)", format_size(file_size), file_size);

    let endpoint = Endpoint::new(EndpointConfig {
        window_size,
        ..EndpointConfig::default()
    });

    println!("Connecting to server...");
    if !endpoint.connect(remote_ip, remote_port) {
        eprintln!("error: connection failed");
        return ExitCode::FAILURE;
    }
    println!("Connected to server");
    println!();

    println!("Sending file...");
    let start = Instant::now();
    let mut buffer = vec![0u8; READ_CHUNK];
    let mut total_sent = 0u64;

    loop {
        let n = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                eprintln!("error: read failed: {err}");
                break;
            }
        };

        let sent = endpoint.send(&buffer[..n]);
        if sent < 0 {
            eprintln!("error: send failed");
            break;
        }
        total_sent += sent as u64;
    }
    println!();

    println!("Closing connection...");
    endpoint.close();

    let elapsed = start.elapsed().as_secs_f64();
    let stats = endpoint.statistics();

    println!();
    println!("=== Transfer Statistics ===");
    println!("Total Time: {elapsed:.3} seconds");
    println!("Data Sent: {} ({} bytes)", format_size(stats.bytes_sent), stats.bytes_sent);
    println!("Packets Sent: {}", stats.packets_sent);
    println!("Packets Retransmitted: {}", stats.packets_retransmitted);
    println!("Packets Dropped: {}", stats.packets_dropped);
    if elapsed > 0.0 {
        let throughput = stats.bytes_sent as f64 / elapsed;
        println!(
            "Average Throughput: {}/s ({:.2} Mbps)",
            format_size(throughput as u64),
            throughput * 8.0 / 1_000_000.0
        );
    }
    println!();

    if total_sent < file_size {
        eprintln!("warning: only {total_sent} of {file_size} bytes were accepted");
        return ExitCode::FAILURE;
    }
    println!("File transmission completed");
    ExitCode::SUCCESS
}
