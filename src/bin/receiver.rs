//! `rdt-receiver <listen_port> <output_file> [window_size]`
//!
//! Thin CLI wrapper over [`rdt::Endpoint::recv`], grounded on
//! `lab2/src/receiver.cpp` for argument order and the statistics it
//! prints at the end.

use std::fs::File;
use std::io::Write;
use std::process::ExitCode;
use std::time::Instant;

use rdt::{Endpoint, EndpointConfig};

const RECV_CHUNK: usize = 64 * 1024;

fn print_usage(program_name: &str) {
    eprintln!("Usage: {program_name} <listen_port> <output_file> [window_size]");
    eprintln!("  listen_port: port to listen on");
    eprintln!("  output_file: file to save received data to");
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
    if args.len() < 3 {
        print_usage(&args[0]);
        return ExitCode::FAILURE;
    }

    let listen_port: u16 = match args[1].parse() {
        Ok(port) => port,
        Err(err) => {
            eprintln!("error: invalid listen_port {:?}: {}", args[1], err);
            return ExitCode::FAILURE;
        }
    };
    let output_file = &args[2];
    let window_size: usize = match args.get(3).map(|s| s.parse()) {
        Some(Ok(n)) => n,
        Some(Err(err)) => {
            eprintln!("error: invalid window_size {:?}: {}", args[3], err);
            return ExitCode::FAILURE;
        }
        None => EndpointConfig::default().window_size,
    };

    println!("=== RDT Protocol - Receiver ===");
    println!("Listen Port: {listen_port}");
    println!("Output File: {output_file}");
    println!("Window Size: {window_size}");
    println!();

    let endpoint = Endpoint::new(EndpointConfig {
        window_size,
        ..EndpointConfig::default()
    });

    println!("Binding to port {listen_port}...");
    if !endpoint.bind(listen_port) {
        eprintln!("error: failed to bind to port {listen_port}");
        return ExitCode::FAILURE;
    }
    if !endpoint.listen(1) {
        eprintln!("error: failed to listen");
        return ExitCode::FAILURE;
    }

    println!("Waiting for connection...");
    let conn = match endpoint.accept() {
        Some(conn) => conn,
        None => {
            eprintln!("error: failed to accept connection");
            return ExitCode::FAILURE;
        }
    };
    println!("Connection accepted");
    println!();

    let mut output = match File::create(output_file) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("error: cannot open output file {output_file:?}: {err}");
            return ExitCode::FAILURE;
        }
    };

    println!("Receiving file...");
    conn.set_recv_timeout(5000);
    let start = Instant::now();
    let mut buffer = vec![0u8; RECV_CHUNK];
    let mut total_received = 0u64;
    let mut failed = false;

    loop {
        let n = conn.recv(&mut buffer);
        if n == 0 {
            println!("Connection closed by remote host");
            break;
        } else if n < 0 {
            eprintln!("error: receive timed out");
            failed = true;
            break;
        }

        if let Err(err) = output.write_all(&buffer[..n as usize]) {
            eprintln!("error: write failed: {err}");
            failed = true;
            break;
        }
        total_received += n as u64;
    }
    println!();

    println!("Closing connection...");
    conn.close();

    let elapsed = start.elapsed().as_secs_f64();
    let stats = conn.statistics();

    println!();
    println!("=== Transfer Statistics ===");
    println!("Total Time: {elapsed:.3} seconds");
    println!(
        "Data Received: {} ({} bytes)",
        format_size(stats.bytes_received),
        stats.bytes_received
    );
    println!("Packets Received: {}", stats.packets_received);
    println!("Packets Dropped: {}", stats.packets_dropped);
    if elapsed > 0.0 {
        let throughput = stats.bytes_received as f64 / elapsed;
        println!(
            "Average Throughput: {}/s ({:.2} Mbps)",
            format_size(throughput as u64),
            throughput * 8.0 / 1_000_000.0
        );
    }
    println!();

    let _ = total_received;
    if failed {
        return ExitCode::FAILURE;
    }
    println!("File transmission completed");
    println!("File saved to: {output_file}");
    ExitCode::SUCCESS
}
